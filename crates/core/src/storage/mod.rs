//! Entity store contract shared by the sweeps, the stream aggregator and the API.

pub mod memory;
pub mod postgres;

use crate::domain::client::{BehaviouralMemory, Client, Vulnerability};
use crate::domain::event::{EventStatus, EventType, Finding, Narrative, RiskEvent};
use crate::domain::market::{MarketSnapshot, NewMarketSnapshot};
use crate::domain::portfolio::Portfolio;
use crate::domain::records::{
    BriefPayload, DraftAction, DraftContent, DraftStatus, HeartbeatLog, MeetingBrief,
    NewHeartbeat, SweepKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of the atomic open-event insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(RiskEvent),
    /// An open event with the same dedup key already exists.
    AlreadyOpen,
}

#[derive(Debug, Clone)]
pub struct NewDraft {
    pub risk_event_id: Uuid,
    pub client_id: Option<Uuid>,
    pub action_type: String,
    pub content: DraftContent,
}

#[derive(Debug, Clone)]
pub struct NewBrief {
    pub client_id: Uuid,
    pub meeting_at: DateTime<Utc>,
    pub payload: BriefPayload,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    // clients
    async fn list_clients(&self) -> anyhow::Result<Vec<Client>>;
    async fn get_client(&self, id: Uuid) -> anyhow::Result<Option<Client>>;
    async fn upsert_client(&self, client: &Client) -> anyhow::Result<()>;
    async fn update_client_vulnerability(
        &self,
        id: Uuid,
        vulnerability: &Vulnerability,
        checked_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    // portfolios and market
    async fn get_portfolio(&self, client_id: Uuid) -> anyhow::Result<Option<Portfolio>>;
    async fn upsert_portfolio(&self, portfolio: &Portfolio) -> anyhow::Result<()>;
    async fn latest_snapshot(&self) -> anyhow::Result<Option<MarketSnapshot>>;
    async fn insert_snapshot(&self, snapshot: &NewMarketSnapshot)
        -> anyhow::Result<MarketSnapshot>;

    // risk events
    /// Inserts an open event unless one with the same dedup key is already open.
    /// Implementations make the check and the write a single atomic step.
    async fn insert_open_event(&self, finding: &Finding) -> anyhow::Result<InsertOutcome>;
    async fn find_open_events(
        &self,
        client_id: Option<Uuid>,
        event_type: EventType,
    ) -> anyhow::Result<Vec<RiskEvent>>;
    async fn find_open_events_by_type(&self, event_type: EventType)
        -> anyhow::Result<Vec<RiskEvent>>;
    async fn list_open_events(&self) -> anyhow::Result<Vec<RiskEvent>>;
    async fn get_event(&self, id: Uuid) -> anyhow::Result<Option<RiskEvent>>;
    async fn update_event_interpretation(
        &self,
        id: Uuid,
        narrative: &Narrative,
    ) -> anyhow::Result<()>;
    /// Moves an open event to a terminal status. Returns `None` when the event does not
    /// exist or is no longer open.
    async fn close_event(
        &self,
        id: Uuid,
        status: EventStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<RiskEvent>>;

    // drafts
    async fn insert_draft(&self, draft: &NewDraft) -> anyhow::Result<DraftAction>;
    async fn get_draft(&self, id: Uuid) -> anyhow::Result<Option<DraftAction>>;
    async fn list_pending_drafts(&self) -> anyhow::Result<Vec<DraftAction>>;
    async fn find_pending_drafts_by_event(&self, event_id: Uuid)
        -> anyhow::Result<Vec<DraftAction>>;
    /// Only pending drafts can change. Returns `None` when the draft is missing or settled.
    async fn update_pending_draft(
        &self,
        id: Uuid,
        content: Option<&DraftContent>,
        status: DraftStatus,
    ) -> anyhow::Result<Option<DraftAction>>;

    // meeting briefs
    async fn insert_brief(&self, brief: &NewBrief) -> anyhow::Result<MeetingBrief>;
    async fn recent_briefs(&self, limit: usize) -> anyhow::Result<Vec<MeetingBrief>>;
    async fn briefs_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<MeetingBrief>>;

    // behavioural memory
    async fn insert_memory(&self, memory: &BehaviouralMemory) -> anyhow::Result<()>;
    async fn recent_memory(
        &self,
        client_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<BehaviouralMemory>>;

    // heartbeats
    async fn insert_heartbeat(&self, heartbeat: &NewHeartbeat) -> anyhow::Result<HeartbeatLog>;
    async fn recent_heartbeats(&self, limit: usize) -> anyhow::Result<Vec<HeartbeatLog>>;
    async fn latest_heartbeat(&self, kind: SweepKind) -> anyhow::Result<Option<HeartbeatLog>>;
}

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    use anyhow::Context;

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
