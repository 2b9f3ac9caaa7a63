use atlas_core::actions::{self, ActionError};
use atlas_core::broadcast::{Broadcaster, UPDATE};
use atlas_core::domain::event::RiskEvent;
use atlas_core::domain::records::{DraftAction, DraftContent, SweepKind};
use atlas_core::storage::EntityStore;
use atlas_core::stream::{self, HeartbeatStatus, LiveStrip, StreamFilter, StreamView};
use atlas_core::sweep::{run_sweep, SweepContext, SweepReport};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub sweeps: Arc<SweepContext>,
    pub broadcaster: Arc<Broadcaster>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stream", get(get_stream))
        .route("/stream/live", get(stream_live))
        .route("/live-strip", get(get_live_strip))
        .route("/heartbeat-status", get(get_heartbeat_status))
        .route("/risk-events", get(list_risk_events))
        .route("/risk-events/:id/resolve", post(resolve_event))
        .route("/risk-events/:id/dismiss", post(dismiss_event))
        .route("/risk-events/:id/draft", post(generate_draft))
        .route("/drafts/:id", axum::routing::put(edit_draft))
        .route("/drafts/:id/approve", post(approve_draft))
        .route("/drafts/:id/reject", post(reject_draft))
        .route("/tasks/:sweep", post(run_task))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    search: Option<String>,
}

async fn get_stream(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
) -> Result<Json<StreamView>, StatusCode> {
    let filter: StreamFilter = q
        .filter
        .as_deref()
        .unwrap_or("all")
        .parse()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let search = q.search.unwrap_or_default();
    Ok(Json(
        stream::build_stream(state.store.as_ref(), filter, &search).await,
    ))
}

/// Server-sent "update" notifications. The connection carries no state; clients re-fetch
/// `/stream` on every event.
async fn stream_live(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let listener = state.broadcaster.subscribe();
    tracing::debug!(listener = listener.id(), "live stream opened");
    let events = futures_util::stream::unfold(listener, |mut listener| async move {
        let message = listener.recv().await?;
        Some((Ok(Event::default().data(message)), listener))
    });
    Sse::new(events).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}

async fn get_live_strip(State(state): State<AppState>) -> Result<Json<LiveStrip>, StatusCode> {
    stream::live_strip(state.store.as_ref(), Utc::now())
        .await
        .map(Json)
        .map_err(internal)
}

async fn get_heartbeat_status(
    State(state): State<AppState>,
) -> Result<Json<HeartbeatStatus>, StatusCode> {
    stream::heartbeat_status(
        state.store.as_ref(),
        state.sweeps.tunables.book_interval,
        Utc::now(),
    )
    .await
    .map(Json)
    .map_err(internal)
}

async fn list_risk_events(
    State(state): State<AppState>,
) -> Result<Json<Vec<RiskEvent>>, StatusCode> {
    actions::list_open_events(state.store.as_ref())
        .await
        .map(Json)
        .map_err(action_status)
}

async fn resolve_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskEvent>, StatusCode> {
    let event = actions::resolve_event(state.store.as_ref(), id)
        .await
        .map_err(action_status)?;
    notify(&state);
    Ok(Json(event))
}

async fn dismiss_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskEvent>, StatusCode> {
    let event = actions::dismiss_event(state.store.as_ref(), id)
        .await
        .map_err(action_status)?;
    notify(&state);
    Ok(Json(event))
}

async fn generate_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DraftAction>, StatusCode> {
    let draft = actions::generate_draft(state.store.as_ref(), &state.sweeps.narrative, id)
        .await
        .map_err(action_status)?;
    notify(&state);
    Ok(Json(draft))
}

async fn edit_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(content): Json<DraftContent>,
) -> Result<Json<DraftAction>, StatusCode> {
    let draft = actions::edit_draft(state.store.as_ref(), id, &content)
        .await
        .map_err(action_status)?;
    notify(&state);
    Ok(Json(draft))
}

async fn approve_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DraftAction>, StatusCode> {
    let draft = actions::approve_draft(state.store.as_ref(), id)
        .await
        .map_err(action_status)?;
    notify(&state);
    Ok(Json(draft))
}

async fn reject_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DraftAction>, StatusCode> {
    let draft = actions::reject_draft(state.store.as_ref(), id)
        .await
        .map_err(action_status)?;
    notify(&state);
    Ok(Json(draft))
}

/// Runs one sweep now, inside the request. The sweep records its own heartbeat.
async fn run_task(
    State(state): State<AppState>,
    Path(sweep): Path<String>,
) -> Result<Json<SweepReport>, StatusCode> {
    let kind: SweepKind = sweep.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    tracing::info!(sweep = kind.slug(), "manual sweep requested");
    run_sweep(&state.sweeps, kind)
        .await
        .map(Json)
        .map_err(internal)
}

fn notify(state: &AppState) {
    state.broadcaster.publish(UPDATE);
}

fn internal(err: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&err);
    tracing::error!(error = %err, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn action_status(err: ActionError) -> StatusCode {
    match err {
        ActionError::NotFound(..) => StatusCode::NOT_FOUND,
        ActionError::Conflict(detail) => {
            tracing::debug!(%detail, "action rejected");
            StatusCode::CONFLICT
        }
        ActionError::Store(err) => internal(err),
    }
}
