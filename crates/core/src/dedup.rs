use crate::domain::event::{Finding, RiskEvent};
use crate::storage::{EntityStore, InsertOutcome};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Admission {
    /// Persisted as a new open event; the caller enriches it.
    Accepted(RiskEvent),
    /// An open event with the same subject and type already exists.
    Suppressed,
}

impl Admission {
    pub fn accepted(self) -> Option<RiskEvent> {
        match self {
            Admission::Accepted(event) => Some(event),
            Admission::Suppressed => None,
        }
    }
}

/// Admits a finding at most once while an event for its (subject, type) key is open.
/// The check and the insert are one store call, so overlapping sweeps cannot both win.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn EntityStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn admit(&self, finding: &Finding) -> anyhow::Result<Admission> {
        match self.store.insert_open_event(finding).await? {
            InsertOutcome::Inserted(event) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    subject = %event.subject_key(),
                    urgency = %event.urgency,
                    "finding admitted"
                );
                Ok(Admission::Accepted(event))
            }
            InsertOutcome::AlreadyOpen => {
                tracing::debug!(
                    event_type = %finding.event_type(),
                    subject = %finding.subject_key(),
                    "finding suppressed; event already open"
                );
                Ok(Admission::Suppressed)
            }
        }
    }
}
