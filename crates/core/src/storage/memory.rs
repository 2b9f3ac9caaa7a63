use crate::domain::client::{BehaviouralMemory, Client, Vulnerability};
use crate::domain::event::{EventStatus, EventType, Finding, Narrative, RiskEvent};
use crate::domain::market::{MarketSnapshot, NewMarketSnapshot};
use crate::domain::portfolio::Portfolio;
use crate::domain::records::{
    DraftAction, DraftContent, DraftStatus, HeartbeatLog, MeetingBrief, NewHeartbeat, SweepKind,
};
use crate::storage::{EntityStore, InsertOutcome, NewBrief, NewDraft};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    clients: Vec<Client>,
    portfolios: Vec<Portfolio>,
    snapshots: Vec<MarketSnapshot>,
    events: Vec<RiskEvent>,
    drafts: Vec<DraftAction>,
    briefs: Vec<MeetingBrief>,
    memory: Vec<BehaviouralMemory>,
    heartbeats: Vec<HeartbeatLog>,
}

/// Process-local store. Every write happens under one lock, so the open-event
/// check-and-insert is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first; ties keep the most recently inserted row first.
fn newest_first<T: Clone>(rows: &[T], at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut out: Vec<T> = rows.iter().rev().cloned().collect();
    out.sort_by(|a, b| at(b).cmp(&at(a)));
    out
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn list_clients(&self) -> anyhow::Result<Vec<Client>> {
        Ok(self.tables.read().await.clients.clone())
    }

    async fn get_client(&self, id: Uuid) -> anyhow::Result<Option<Client>> {
        let tables = self.tables.read().await;
        Ok(tables.clients.iter().find(|c| c.id == id).cloned())
    }

    async fn upsert_client(&self, client: &Client) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        match tables.clients.iter_mut().find(|c| c.id == client.id) {
            Some(existing) => *existing = client.clone(),
            None => tables.clients.push(client.clone()),
        }
        Ok(())
    }

    async fn update_client_vulnerability(
        &self,
        id: Uuid,
        vulnerability: &Vulnerability,
        checked_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        let client = tables
            .clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow::anyhow!("client {id} not found"))?;
        client.vulnerability = vulnerability.clone();
        client.last_proactive_check = Some(checked_at);
        Ok(())
    }

    async fn get_portfolio(&self, client_id: Uuid) -> anyhow::Result<Option<Portfolio>> {
        let tables = self.tables.read().await;
        Ok(tables
            .portfolios
            .iter()
            .find(|p| p.client_id == client_id)
            .cloned())
    }

    async fn upsert_portfolio(&self, portfolio: &Portfolio) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        match tables
            .portfolios
            .iter_mut()
            .find(|p| p.client_id == portfolio.client_id)
        {
            Some(existing) => *existing = portfolio.clone(),
            None => tables.portfolios.push(portfolio.clone()),
        }
        Ok(())
    }

    async fn latest_snapshot(&self) -> anyhow::Result<Option<MarketSnapshot>> {
        let tables = self.tables.read().await;
        Ok(newest_first(&tables.snapshots, |s| s.taken_at)
            .into_iter()
            .next())
    }

    async fn insert_snapshot(
        &self,
        snapshot: &NewMarketSnapshot,
    ) -> anyhow::Result<MarketSnapshot> {
        let row = MarketSnapshot {
            id: Uuid::new_v4(),
            taken_at: snapshot.taken_at,
            ftse_100: snapshot.ftse_100,
            ftse_250: snapshot.ftse_250,
            sector_performance: snapshot.sector_performance.clone(),
        };
        self.tables.write().await.snapshots.push(row.clone());
        Ok(row)
    }

    async fn insert_open_event(&self, finding: &Finding) -> anyhow::Result<InsertOutcome> {
        let key = finding.subject_key();
        let event_type = finding.event_type();

        let mut tables = self.tables.write().await;
        if tables
            .events
            .iter()
            .any(|e| e.is_open() && e.event_type == event_type && e.subject_key() == key)
        {
            return Ok(InsertOutcome::AlreadyOpen);
        }
        let event = RiskEvent::from_finding(Uuid::new_v4(), finding, Utc::now());
        tables.events.push(event.clone());
        Ok(InsertOutcome::Inserted(event))
    }

    async fn find_open_events(
        &self,
        client_id: Option<Uuid>,
        event_type: EventType,
    ) -> anyhow::Result<Vec<RiskEvent>> {
        let key = crate::domain::event::subject_key(event_type, client_id);
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.is_open() && e.event_type == event_type && e.subject_key() == key)
            .cloned()
            .collect())
    }

    async fn find_open_events_by_type(
        &self,
        event_type: EventType,
    ) -> anyhow::Result<Vec<RiskEvent>> {
        let tables = self.tables.read().await;
        let open: Vec<RiskEvent> = tables
            .events
            .iter()
            .filter(|e| e.is_open() && e.event_type == event_type)
            .cloned()
            .collect();
        Ok(newest_first(&open, |e| e.created_at))
    }

    async fn list_open_events(&self) -> anyhow::Result<Vec<RiskEvent>> {
        let tables = self.tables.read().await;
        let open: Vec<RiskEvent> = tables.events.iter().filter(|e| e.is_open()).cloned().collect();
        Ok(newest_first(&open, |e| e.created_at))
    }

    async fn get_event(&self, id: Uuid) -> anyhow::Result<Option<RiskEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.events.iter().find(|e| e.id == id).cloned())
    }

    async fn update_event_interpretation(
        &self,
        id: Uuid,
        narrative: &Narrative,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        let event = tables
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow::anyhow!("risk event {id} not found"))?;
        event.interpretation = Some(narrative.clone());
        Ok(())
    }

    async fn close_event(
        &self,
        id: Uuid,
        status: EventStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<RiskEvent>> {
        anyhow::ensure!(status.is_terminal(), "cannot close an event as {status}");
        let mut tables = self.tables.write().await;
        Ok(tables
            .events
            .iter_mut()
            .find(|e| e.id == id && e.is_open())
            .map(|event| {
                event.status = status;
                event.resolved_at = Some(at);
                event.clone()
            }))
    }

    async fn insert_draft(&self, draft: &NewDraft) -> anyhow::Result<DraftAction> {
        let row = DraftAction {
            id: Uuid::new_v4(),
            risk_event_id: draft.risk_event_id,
            client_id: draft.client_id,
            action_type: draft.action_type.clone(),
            content: draft.content.clone(),
            status: DraftStatus::Pending,
            created_at: Utc::now(),
        };
        self.tables.write().await.drafts.push(row.clone());
        Ok(row)
    }

    async fn get_draft(&self, id: Uuid) -> anyhow::Result<Option<DraftAction>> {
        let tables = self.tables.read().await;
        Ok(tables.drafts.iter().find(|d| d.id == id).cloned())
    }

    async fn list_pending_drafts(&self) -> anyhow::Result<Vec<DraftAction>> {
        let tables = self.tables.read().await;
        let pending: Vec<DraftAction> =
            tables.drafts.iter().filter(|d| d.is_pending()).cloned().collect();
        Ok(newest_first(&pending, |d| d.created_at))
    }

    async fn find_pending_drafts_by_event(
        &self,
        event_id: Uuid,
    ) -> anyhow::Result<Vec<DraftAction>> {
        let tables = self.tables.read().await;
        let pending: Vec<DraftAction> = tables
            .drafts
            .iter()
            .filter(|d| d.is_pending() && d.risk_event_id == event_id)
            .cloned()
            .collect();
        Ok(newest_first(&pending, |d| d.created_at))
    }

    async fn update_pending_draft(
        &self,
        id: Uuid,
        content: Option<&DraftContent>,
        status: DraftStatus,
    ) -> anyhow::Result<Option<DraftAction>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .drafts
            .iter_mut()
            .find(|d| d.id == id && d.is_pending())
            .map(|draft| {
                if let Some(content) = content {
                    draft.content = content.clone();
                }
                draft.status = status;
                draft.clone()
            }))
    }

    async fn insert_brief(&self, brief: &NewBrief) -> anyhow::Result<MeetingBrief> {
        let row = MeetingBrief {
            id: Uuid::new_v4(),
            client_id: brief.client_id,
            meeting_at: brief.meeting_at,
            payload: brief.payload.clone(),
            created_at: Utc::now(),
        };
        self.tables.write().await.briefs.push(row.clone());
        Ok(row)
    }

    async fn recent_briefs(&self, limit: usize) -> anyhow::Result<Vec<MeetingBrief>> {
        let tables = self.tables.read().await;
        let mut out = newest_first(&tables.briefs, |b| b.created_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn briefs_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<MeetingBrief>> {
        let tables = self.tables.read().await;
        let recent: Vec<MeetingBrief> = tables
            .briefs
            .iter()
            .filter(|b| b.created_at >= since)
            .cloned()
            .collect();
        Ok(newest_first(&recent, |b| b.created_at))
    }

    async fn insert_memory(&self, memory: &BehaviouralMemory) -> anyhow::Result<()> {
        self.tables.write().await.memory.push(memory.clone());
        Ok(())
    }

    async fn recent_memory(
        &self,
        client_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<BehaviouralMemory>> {
        let tables = self.tables.read().await;
        let rows: Vec<BehaviouralMemory> = tables
            .memory
            .iter()
            .filter(|m| m.client_id == client_id)
            .cloned()
            .collect();
        let mut out = newest_first(&rows, |m| m.created_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn insert_heartbeat(&self, heartbeat: &NewHeartbeat) -> anyhow::Result<HeartbeatLog> {
        let row = HeartbeatLog {
            id: Uuid::new_v4(),
            sweep_type: heartbeat.sweep_type,
            portfolios_scanned: heartbeat.portfolios_scanned,
            findings_found: heartbeat.findings_found,
            summary: heartbeat.summary.clone(),
            created_at: Utc::now(),
        };
        self.tables.write().await.heartbeats.push(row.clone());
        Ok(row)
    }

    async fn recent_heartbeats(&self, limit: usize) -> anyhow::Result<Vec<HeartbeatLog>> {
        let tables = self.tables.read().await;
        let mut out = newest_first(&tables.heartbeats, |h| h.created_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn latest_heartbeat(&self, kind: SweepKind) -> anyhow::Result<Option<HeartbeatLog>> {
        let tables = self.tables.read().await;
        let rows: Vec<HeartbeatLog> = tables
            .heartbeats
            .iter()
            .filter(|h| h.sweep_type == kind)
            .cloned()
            .collect();
        Ok(newest_first(&rows, |h| h.created_at).into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Classification, Urgency};
    use std::sync::Arc;

    fn concentration(client_id: Uuid) -> Finding {
        Finding::for_client(
            client_id,
            Urgency::Medium,
            Classification::Concentration {
                sector: "Energy".to_string(),
                exposure: 0.4,
            },
        )
    }

    #[tokio::test]
    async fn second_open_insert_for_same_key_is_rejected() {
        let store = MemoryStore::new();
        let client_id = Uuid::new_v4();

        assert!(matches!(
            store.insert_open_event(&concentration(client_id)).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            store.insert_open_event(&concentration(client_id)).await.unwrap(),
            InsertOutcome::AlreadyOpen
        ));
        // Different client is a different key.
        assert!(matches!(
            store.insert_open_event(&concentration(Uuid::new_v4())).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
    }

    #[tokio::test]
    async fn closing_reopens_the_key() {
        let store = MemoryStore::new();
        let client_id = Uuid::new_v4();
        let InsertOutcome::Inserted(event) =
            store.insert_open_event(&concentration(client_id)).await.unwrap()
        else {
            panic!("expected insert");
        };

        let closed = store
            .close_event(event.id, EventStatus::Dismissed, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, EventStatus::Dismissed);
        assert!(closed.resolved_at.is_some());
        assert!(store
            .close_event(event.id, EventStatus::AdviserResolved, Utc::now())
            .await
            .unwrap()
            .is_none());

        assert!(matches!(
            store.insert_open_event(&concentration(client_id)).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_singleton_inserts_keep_one_open() {
        let store = Arc::new(MemoryStore::new());
        let finding = Finding::book_wide(
            Urgency::High,
            Classification::MarketInterrupt {
                index_delta: -0.03,
                previous_value: 8000.0,
                current_value: 7760.0,
                headlines: vec![],
                exposed_clients: vec![],
            },
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let finding = finding.clone();
            handles.push(tokio::spawn(async move {
                store.insert_open_event(&finding).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let open = store
            .find_open_events_by_type(EventType::MarketInterrupt)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert!(open[0].client_id.is_none());
    }

    #[tokio::test]
    async fn settled_drafts_are_immutable() {
        let store = MemoryStore::new();
        let draft = store
            .insert_draft(&NewDraft {
                risk_event_id: Uuid::new_v4(),
                client_id: None,
                action_type: "email".to_string(),
                content: DraftContent {
                    subject: "Hi".to_string(),
                    body: "Body".to_string(),
                },
            })
            .await
            .unwrap();

        let approved = store
            .update_pending_draft(draft.id, None, DraftStatus::Approved)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, DraftStatus::Approved);

        let edit = DraftContent {
            subject: "Changed".to_string(),
            body: "Changed".to_string(),
        };
        assert!(store
            .update_pending_draft(draft.id, Some(&edit), DraftStatus::Pending)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get_draft(draft.id).await.unwrap().unwrap().content.subject, "Hi");
    }
}
