use atlas_core::broadcast::Broadcaster;
use atlas_core::config::{bool_var, parse_var, Settings, Tunables};
use atlas_core::storage::{EntityStore, MemoryStore, PgStore};
use atlas_core::sweep::{Scheduler, SweepContext};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let tunables = Tunables::from_env()?;
    let store = open_store(&settings).await;

    let broadcaster = Arc::new(Broadcaster::new(tunables.broadcast_buffer));
    broadcaster.start();

    let sweeps = Arc::new(SweepContext::from_settings(
        &settings,
        tunables,
        store.clone(),
        broadcaster.clone(),
    ));
    let scheduler = bool_var("API_EMBEDDED_SCHEDULER", true).then(|| Scheduler::start(sweeps.clone()));

    let state = routes::AppState {
        store,
        sweeps,
        broadcaster: broadcaster.clone(),
    };
    let app = routes::router(state);

    let port: u16 = parse_var("PORT", 3000)?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let embedded_sweeps = scheduler.as_ref().map(Scheduler::kinds).unwrap_or_default();
    tracing::info!(%addr, ?embedded_sweeps, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broadcaster))
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}

/// Postgres when configured and reachable; otherwise an in-memory store so the API still
/// serves (empty) feeds.
async fn open_store(settings: &Settings) -> Arc<dyn EntityStore> {
    match settings.require_database_url() {
        Ok(db_url) => match PgStore::connect(db_url, 5).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db unavailable; starting API on in-memory store");
                Arc::new(MemoryStore::new())
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; starting API on in-memory store");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Ctrl-C, then disconnect live listeners so open SSE responses end and shutdown completes.
async fn shutdown_signal(broadcaster: Arc<Broadcaster>) {
    let _ = tokio::signal::ctrl_c().await;
    broadcaster.stop();
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
