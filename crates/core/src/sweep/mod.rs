//! The four detection loops and what they share: one [`SweepContext`] of collaborators,
//! a [`SweepReport`] per run, a heartbeat record and an "update" broadcast when anything
//! new was admitted.

pub mod book;
pub mod meeting_prep;
pub mod morning;
pub mod pulse;
pub mod scheduler;

use crate::broadcast::{Broadcaster, UPDATE};
use crate::config::{Settings, Tunables};
use crate::dedup::DedupGate;
use crate::domain::event::{Narrative, RiskEvent};
use crate::domain::records::{NewHeartbeat, SweepKind};
use crate::ingest::{DisabledMarketProvider, HttpJsonMarketProvider, MarketDataProvider};
use crate::llm::anthropic::AnthropicClient;
use crate::llm::{DisabledNarrativeClient, InterpretRequest, NarrativeClient, NarrativeGateway};
use crate::storage::EntityStore;
use serde::Serialize;
use std::sync::Arc;

pub use scheduler::Scheduler;

const NO_MEMORY: &str = "No prior relevant behavioral history.";
const MEMORY_FOR_NARRATIVE: usize = 3;

pub struct SweepContext {
    pub store: Arc<dyn EntityStore>,
    pub market: Arc<dyn MarketDataProvider>,
    pub narrative: NarrativeGateway,
    pub broadcaster: Arc<Broadcaster>,
    pub tunables: Tunables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub scanned: u32,
    pub accepted: u32,
    pub suppressed: u32,
    pub failed: u32,
    pub summary: String,
}

impl SweepReport {
    pub fn new(kind: SweepKind) -> Self {
        Self {
            kind,
            scanned: 0,
            accepted: 0,
            suppressed: 0,
            failed: 0,
            summary: String::new(),
        }
    }
}

impl SweepContext {
    /// Wires the configured collaborators. A missing API key or provider URL disables
    /// that collaborator; sweeps then run on deterministic fallbacks.
    pub fn from_settings(
        settings: &Settings,
        tunables: Tunables,
        store: Arc<dyn EntityStore>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let client: Arc<dyn NarrativeClient> = match AnthropicClient::from_settings(settings) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                tracing::warn!(error = %err, "narrative generation disabled");
                Arc::new(DisabledNarrativeClient)
            }
        };
        let market: Arc<dyn MarketDataProvider> =
            match HttpJsonMarketProvider::from_settings(settings) {
                Ok(provider) => Arc::new(provider),
                Err(err) => {
                    tracing::warn!(error = %err, "market data provider disabled");
                    Arc::new(DisabledMarketProvider)
                }
            };
        Self {
            store,
            market,
            narrative: NarrativeGateway::new(
                client,
                tunables.narrative_timeout,
                tunables.narrative_retries,
            ),
            broadcaster,
            tunables,
        }
    }

    pub fn gate(&self) -> DedupGate {
        DedupGate::new(self.store.clone())
    }

    /// Narrates a freshly admitted event and stores the result. A collaborator failure
    /// stores the deterministic fallback instead; only a store failure is an error.
    pub(crate) async fn enrich(
        &self,
        event: &RiskEvent,
        client_name: Option<String>,
        memory_summary: String,
        market_summary: &str,
    ) -> anyhow::Result<Narrative> {
        let req = InterpretRequest {
            event_type: event.event_type,
            urgency: event.urgency,
            reason: event.reason(),
            classification: event.classification.clone(),
            client_name,
            memory_summary,
            market_summary: market_summary.to_string(),
        };
        let narrative = self.narrative.interpret(&req).await;
        if let Some(error) = &narrative.error {
            tracing::warn!(event_id = %event.id, error = %error, "enrichment fell back");
        }
        self.store
            .update_event_interpretation(event.id, &narrative)
            .await?;
        Ok(narrative)
    }

    /// Heartbeat plus broadcast. Neither may fail the sweep that already did its work.
    pub(crate) async fn finish(&self, report: &SweepReport) {
        let heartbeat = NewHeartbeat {
            sweep_type: report.kind,
            portfolios_scanned: report.scanned,
            findings_found: report.accepted,
            summary: report.summary.clone(),
        };
        if let Err(err) = self.store.insert_heartbeat(&heartbeat).await {
            tracing::warn!(sweep = report.kind.slug(), error = %err, "heartbeat write failed");
        }
        if report.accepted > 0 {
            let listeners = self.broadcaster.publish(UPDATE);
            tracing::debug!(sweep = report.kind.slug(), listeners, "update broadcast");
        }
    }
}

pub(crate) fn memory_summary(memories: &[String]) -> String {
    if memories.is_empty() {
        return NO_MEMORY.to_string();
    }
    memories
        .iter()
        .take(MEMORY_FOR_NARRATIVE)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs one sweep to completion. Errors mean the store was unavailable; a heartbeat
/// recording the failure is still attempted.
pub async fn run_sweep(ctx: &SweepContext, kind: SweepKind) -> anyhow::Result<SweepReport> {
    tracing::info!(sweep = kind.slug(), "sweep started");
    let result = match kind {
        SweepKind::Pulse => pulse::run(ctx).await,
        SweepKind::Book => book::run(ctx, None).await,
        SweepKind::Macro => morning::run(ctx).await,
        SweepKind::MeetingPrep => meeting_prep::run(ctx).await,
    };

    match result {
        Ok(report) => {
            ctx.finish(&report).await;
            tracing::info!(
                sweep = kind.slug(),
                scanned = report.scanned,
                accepted = report.accepted,
                suppressed = report.suppressed,
                failed = report.failed,
                "sweep finished"
            );
            Ok(report)
        }
        Err(err) => {
            tracing::error!(sweep = kind.slug(), error = %err, "sweep aborted");
            let mut report = SweepReport::new(kind);
            report.summary = format!("Error: {err:#}");
            ctx.finish(&report).await;
            Err(err)
        }
    }
}
