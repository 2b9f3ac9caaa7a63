pub mod anthropic;
pub mod error;
pub mod gateway;
pub mod json;

use crate::domain::event::{Classification, EventType, Narrative, Urgency};
use crate::domain::records::{BriefPayload, DraftContent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use gateway::{Enriched, NarrativeGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    Disabled,
}

/// A deterministic finding plus the context the collaborator needs to narrate it.
#[derive(Debug, Clone, Serialize)]
pub struct InterpretRequest {
    pub event_type: EventType,
    pub urgency: Urgency,
    pub reason: String,
    pub classification: Classification,
    pub client_name: Option<String>,
    pub memory_summary: String,
    pub market_summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub name: String,
    pub vulnerability_category: String,
}

/// Book-wide morning summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterNarrative {
    pub title: String,
    pub bullets: Vec<String>,
    pub market_summary: String,
    pub critical_news: Vec<String>,
    pub top_risks: Vec<String>,
    pub suggested_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftRequest {
    pub event_type: EventType,
    pub urgency: Urgency,
    pub reason: String,
    pub client_name: Option<String>,
    pub headline: Option<String>,
}

/// Structured inputs for a pre-meeting brief.
#[derive(Debug, Clone, Serialize)]
pub struct BriefContext {
    pub client_name: String,
    pub total_value: f64,
    pub cash_balance: f64,
    pub top_sectors: Vec<(String, f64)>,
    pub target_risk_score: f64,
    pub current_risk_score: f64,
    pub isa_allowance_remaining: f64,
    pub unrealized_gains: f64,
    pub estimated_gross_income: f64,
    pub memories: Vec<String>,
    pub open_risks: Vec<String>,
}

/// The external text-generation collaborator. Every call is treated as unreliable;
/// [`NarrativeGateway`] adds timeouts, retries and fallbacks on top.
#[async_trait::async_trait]
pub trait NarrativeClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn interpret_finding(&self, req: &InterpretRequest) -> anyhow::Result<Narrative>;

    async fn summarize_book(
        &self,
        roster: &[RosterEntry],
        market_summary: &str,
    ) -> anyhow::Result<MasterNarrative>;

    async fn draft_communication(&self, req: &DraftRequest) -> anyhow::Result<DraftContent>;

    async fn generate_meeting_brief(
        &self,
        client_id: Uuid,
        ctx: &BriefContext,
    ) -> anyhow::Result<BriefPayload>;
}

/// Used when no API key is configured: every call fails, so the gateway's
/// deterministic fallbacks are what gets persisted.
#[derive(Debug, Clone, Default)]
pub struct DisabledNarrativeClient;

#[async_trait::async_trait]
impl NarrativeClient for DisabledNarrativeClient {
    fn provider(&self) -> Provider {
        Provider::Disabled
    }

    async fn interpret_finding(&self, _req: &InterpretRequest) -> anyhow::Result<Narrative> {
        anyhow::bail!("narrative generation disabled")
    }

    async fn summarize_book(
        &self,
        _roster: &[RosterEntry],
        _market_summary: &str,
    ) -> anyhow::Result<MasterNarrative> {
        anyhow::bail!("narrative generation disabled")
    }

    async fn draft_communication(&self, _req: &DraftRequest) -> anyhow::Result<DraftContent> {
        anyhow::bail!("narrative generation disabled")
    }

    async fn generate_meeting_brief(
        &self,
        _client_id: Uuid,
        _ctx: &BriefContext,
    ) -> anyhow::Result<BriefPayload> {
        anyhow::bail!("narrative generation disabled")
    }
}
