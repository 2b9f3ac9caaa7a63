//! Adviser-initiated state changes on events and drafts.

use crate::domain::event::{EventStatus, RiskEvent};
use crate::domain::records::{DraftAction, DraftContent, DraftStatus};
use crate::llm::{DraftRequest, NarrativeGateway};
use crate::storage::{EntityStore, NewDraft};
use chrono::Utc;
use std::fmt;
use uuid::Uuid;

pub const EMAIL_ACTION: &str = "email";

#[derive(Debug)]
pub enum ActionError {
    NotFound(&'static str, Uuid),
    /// The target exists but is no longer in a state that allows the change.
    Conflict(String),
    Store(anyhow::Error),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::NotFound(kind, id) => write!(f, "{kind} {id} not found"),
            ActionError::Conflict(detail) => f.write_str(detail),
            ActionError::Store(err) => write!(f, "store error: {err:#}"),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        ActionError::Store(err)
    }
}

pub type ActionResult<T> = Result<T, ActionError>;

pub async fn list_open_events(store: &dyn EntityStore) -> ActionResult<Vec<RiskEvent>> {
    Ok(store.list_open_events().await?)
}

pub async fn resolve_event(store: &dyn EntityStore, id: Uuid) -> ActionResult<RiskEvent> {
    close(store, id, EventStatus::AdviserResolved).await
}

pub async fn dismiss_event(store: &dyn EntityStore, id: Uuid) -> ActionResult<RiskEvent> {
    close(store, id, EventStatus::Dismissed).await
}

async fn close(store: &dyn EntityStore, id: Uuid, status: EventStatus) -> ActionResult<RiskEvent> {
    if let Some(event) = store.close_event(id, status, Utc::now()).await? {
        tracing::info!(event_id = %id, status = %status, "event closed by adviser");
        return Ok(event);
    }
    match store.get_event(id).await? {
        Some(event) => Err(ActionError::Conflict(format!(
            "event {id} is already {}",
            event.status
        ))),
        None => Err(ActionError::NotFound("event", id)),
    }
}

/// Asks the text collaborator for a client communication about an open event and stores
/// it as a pending draft. A failed generation stores the deterministic fallback text.
pub async fn generate_draft(
    store: &dyn EntityStore,
    gateway: &NarrativeGateway,
    event_id: Uuid,
) -> ActionResult<DraftAction> {
    let event = store
        .get_event(event_id)
        .await?
        .ok_or(ActionError::NotFound("event", event_id))?;
    if !event.is_open() {
        return Err(ActionError::Conflict(format!(
            "event {event_id} is already {}",
            event.status
        )));
    }

    let client_name = match event.client_id {
        Some(id) => store.get_client(id).await?.map(|c| c.full_name()),
        None => None,
    };
    let req = DraftRequest {
        event_type: event.event_type,
        urgency: event.urgency,
        reason: event.reason(),
        client_name,
        headline: event.interpretation.as_ref().map(|n| n.headline.clone()),
    };

    let content = gateway.draft(&req).await;
    if let Some(err) = content.error() {
        tracing::warn!(event_id = %event_id, error = %err, "draft generation failed; storing fallback");
    }
    let draft = store
        .insert_draft(&NewDraft {
            risk_event_id: event.id,
            client_id: event.client_id,
            action_type: EMAIL_ACTION.to_string(),
            content: content.into_value(),
        })
        .await?;
    Ok(draft)
}

pub async fn edit_draft(
    store: &dyn EntityStore,
    id: Uuid,
    content: &DraftContent,
) -> ActionResult<DraftAction> {
    settle(store, id, Some(content), DraftStatus::Pending).await
}

pub async fn approve_draft(store: &dyn EntityStore, id: Uuid) -> ActionResult<DraftAction> {
    settle(store, id, None, DraftStatus::Approved).await
}

pub async fn reject_draft(store: &dyn EntityStore, id: Uuid) -> ActionResult<DraftAction> {
    settle(store, id, None, DraftStatus::Rejected).await
}

async fn settle(
    store: &dyn EntityStore,
    id: Uuid,
    content: Option<&DraftContent>,
    status: DraftStatus,
) -> ActionResult<DraftAction> {
    if let Some(draft) = store.update_pending_draft(id, content, status).await? {
        tracing::info!(draft_id = %id, status = status.as_str(), "draft updated");
        return Ok(draft);
    }
    match store.get_draft(id).await? {
        Some(draft) => Err(ActionError::Conflict(format!(
            "draft {id} is already {}",
            draft.status.as_str()
        ))),
        None => Err(ActionError::NotFound("draft", id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Classification, Finding, Urgency};
    use crate::storage::{InsertOutcome, MemoryStore};
    use crate::testing::{client_named, FakeNarrative};
    use std::sync::Arc;
    use std::time::Duration;

    async fn open_event(store: &MemoryStore, client_id: Uuid) -> RiskEvent {
        let finding = Finding::for_client(
            client_id,
            Urgency::Medium,
            Classification::CgtExposure {
                unrealized_gains: 2_900.0,
            },
        );
        match store.insert_open_event(&finding).await.unwrap() {
            InsertOutcome::Inserted(event) => event,
            InsertOutcome::AlreadyOpen => panic!("fixture already open"),
        }
    }

    fn gateway(narrative: FakeNarrative) -> NarrativeGateway {
        NarrativeGateway::new(Arc::new(narrative), Duration::from_secs(1), 0)
    }

    #[tokio::test]
    async fn resolve_then_dismiss_conflicts() {
        let store = MemoryStore::new();
        let event = open_event(&store, Uuid::new_v4()).await;

        let resolved = resolve_event(&store, event.id).await.unwrap();
        assert_eq!(resolved.status, EventStatus::AdviserResolved);
        assert!(resolved.resolved_at.is_some());
        assert!(list_open_events(&store).await.unwrap().is_empty());

        assert!(matches!(
            dismiss_event(&store, event.id).await,
            Err(ActionError::Conflict(_))
        ));
        assert!(matches!(
            dismiss_event(&store, Uuid::new_v4()).await,
            Err(ActionError::NotFound("event", _))
        ));
    }

    #[tokio::test]
    async fn draft_lifecycle_freezes_after_approval() {
        let store = MemoryStore::new();
        let client = client_named("Ada", "Lovelace");
        store.upsert_client(&client).await.unwrap();
        let event = open_event(&store, client.id).await;

        let draft = generate_draft(&store, &gateway(FakeNarrative::default()), event.id)
            .await
            .unwrap();
        assert_eq!(draft.action_type, "email");
        assert_eq!(draft.status, DraftStatus::Pending);
        assert_eq!(draft.client_id, Some(client.id));

        let edited = edit_draft(
            &store,
            draft.id,
            &DraftContent {
                subject: "Edited".to_string(),
                body: "Dear Ada".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(edited.content.subject, "Edited");
        assert_eq!(edited.status, DraftStatus::Pending);

        approve_draft(&store, draft.id).await.unwrap();
        let late_edit = edit_draft(&store, draft.id, &edited.content).await;
        assert!(matches!(late_edit, Err(ActionError::Conflict(_))));
        assert!(matches!(
            reject_draft(&store, draft.id).await,
            Err(ActionError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn failed_generation_stores_fallback_draft() {
        let store = MemoryStore::new();
        let client = client_named("Grace", "Hopper");
        store.upsert_client(&client).await.unwrap();
        let event = open_event(&store, client.id).await;

        let draft = generate_draft(&store, &gateway(FakeNarrative::failing()), event.id)
            .await
            .unwrap();
        assert!(draft.content.body.starts_with("Dear Grace Hopper,"));
        assert_eq!(store.list_pending_drafts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn drafts_need_an_open_event() {
        let store = MemoryStore::new();
        let event = open_event(&store, Uuid::new_v4()).await;
        dismiss_event(&store, event.id).await.unwrap();
        let gw = gateway(FakeNarrative::default());
        assert!(matches!(
            generate_draft(&store, &gw, event.id).await,
            Err(ActionError::Conflict(_))
        ));
        assert!(matches!(
            generate_draft(&store, &gw, Uuid::new_v4()).await,
            Err(ActionError::NotFound("event", _))
        ));
    }
}
