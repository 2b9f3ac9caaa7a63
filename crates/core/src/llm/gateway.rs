//! Timeout, retry and fallback policy around the narrative collaborator. Nothing
//! returned from here is an error: a failed call yields a deterministic fallback
//! tagged with what went wrong.

use crate::domain::event::{EventType, Narrative};
use crate::domain::records::{BriefPayload, DraftContent};
use crate::domain::{gbp, signed_pct};
use crate::ingest::MarketContext;
use crate::llm::error::failed_stage;
use crate::llm::{
    BriefContext, DraftRequest, InterpretRequest, MasterNarrative, NarrativeClient, Provider,
    RosterEntry,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const FALLBACK_MASTER_TITLE: &str = "Full Client Book Review";

#[derive(Debug, Clone, PartialEq)]
pub enum Enriched<T> {
    Generated(T),
    Fallback { value: T, error: String },
}

impl<T> Enriched<T> {
    pub fn value(&self) -> &T {
        match self {
            Enriched::Generated(value) | Enriched::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Enriched::Generated(value) | Enriched::Fallback { value, .. } => value,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Enriched::Generated(_) => None,
            Enriched::Fallback { error, .. } => Some(error),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Enriched::Fallback { .. })
    }
}

#[derive(Clone)]
pub struct NarrativeGateway {
    client: Arc<dyn NarrativeClient>,
    timeout: Duration,
    retries: u32,
}

impl NarrativeGateway {
    pub fn new(client: Arc<dyn NarrativeClient>, timeout: Duration, retries: u32) -> Self {
        Self {
            client,
            timeout,
            retries,
        }
    }

    pub fn provider(&self) -> Provider {
        self.client.provider()
    }

    async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if self.client.provider() == Provider::Disabled {
            return Err("narrative generation disabled".to_string());
        }

        let mut last_error = String::new();
        for attempt in 0..=self.retries {
            match tokio::time::timeout(self.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    tracing::warn!(
                        op,
                        attempt,
                        stage = failed_stage(&err).unwrap_or("call"),
                        error = %err,
                        "narrative call failed"
                    );
                    last_error = format!("{err:#}");
                }
                Err(_) => {
                    tracing::warn!(op, attempt, timeout = ?self.timeout, "narrative call timed out");
                    last_error = format!("timed out after {}s", self.timeout.as_secs());
                }
            }
        }
        Err(last_error)
    }

    /// Narrative for one finding; never blank.
    pub async fn interpret(&self, req: &InterpretRequest) -> Narrative {
        match self.call("interpret_finding", || self.client.interpret_finding(req)).await {
            Ok(narrative) if is_complete(&narrative) => narrative,
            Ok(_) => Narrative::fallback(req.event_type, "incomplete narrative"),
            Err(error) => Narrative::fallback(req.event_type, error),
        }
    }

    pub async fn summarize_book(
        &self,
        roster: &[RosterEntry],
        market: &MarketContext,
    ) -> Enriched<MasterNarrative> {
        let digest = market.digest();
        match self
            .call("summarize_book", || self.client.summarize_book(roster, &digest))
            .await
        {
            Ok(master) if master.title.trim().is_empty() && master.bullets.is_empty() => {
                Enriched::Fallback {
                    value: fallback_master(roster, market),
                    error: "incomplete master narrative".to_string(),
                }
            }
            Ok(mut master) => {
                if master.title.trim().is_empty() {
                    master.title = FALLBACK_MASTER_TITLE.to_string();
                }
                if master.market_summary.trim().is_empty() {
                    master.market_summary = digest;
                }
                Enriched::Generated(master)
            }
            Err(error) => Enriched::Fallback {
                value: fallback_master(roster, market),
                error,
            },
        }
    }

    pub async fn draft(&self, req: &DraftRequest) -> Enriched<DraftContent> {
        match self
            .call("draft_communication", || self.client.draft_communication(req))
            .await
        {
            Ok(draft) if !draft.subject.trim().is_empty() && !draft.body.trim().is_empty() => {
                Enriched::Generated(draft)
            }
            Ok(_) => Enriched::Fallback {
                value: fallback_draft(req),
                error: "empty draft".to_string(),
            },
            Err(error) => Enriched::Fallback {
                value: fallback_draft(req),
                error,
            },
        }
    }

    pub async fn meeting_brief(&self, client_id: Uuid, ctx: &BriefContext) -> BriefPayload {
        match self
            .call("generate_meeting_brief", || {
                self.client.generate_meeting_brief(client_id, ctx)
            })
            .await
        {
            Ok(payload) if is_usable_brief(&payload) => payload,
            Ok(_) => fallback_brief(ctx, "incomplete brief".to_string()),
            Err(error) => fallback_brief(ctx, error),
        }
    }
}

fn is_complete(n: &Narrative) -> bool {
    !n.headline.trim().is_empty()
        && !n.consequence_if_ignored.trim().is_empty()
        && !n.behavioural_nuance.trim().is_empty()
}

fn is_usable_brief(b: &BriefPayload) -> bool {
    !b.client_summary.trim().is_empty()
        && (!b.priority_talking_point.trim().is_empty() || !b.talking_points.is_empty())
}

pub fn fallback_master(roster: &[RosterEntry], market: &MarketContext) -> MasterNarrative {
    let mut bullets = vec![format!("{} clients in the book reviewed overnight.", roster.len())];
    if let Some(indices) = &market.indices {
        bullets.push(format!("FTSE 100 at {:.2}, FTSE 250 at {:.2}.", indices.ftse_100, indices.ftse_250));
        let mut moves: Vec<(&String, &f64)> = indices.sector_performance.iter().collect();
        moves.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((sector, perf)) = moves.first() {
            if **perf < 0.0 {
                bullets.push(format!("Weakest sector: {sector} ({}).", signed_pct(**perf)));
            }
        }
    }

    let vulnerable: Vec<String> = roster
        .iter()
        .filter(|c| c.vulnerability_category != "None")
        .map(|c| format!("{} ({})", c.name, c.vulnerability_category))
        .collect();

    MasterNarrative {
        title: FALLBACK_MASTER_TITLE.to_string(),
        bullets,
        market_summary: market.digest(),
        critical_news: market.news_headlines.iter().take(3).cloned().collect(),
        top_risks: vulnerable,
        suggested_actions: vec!["Review open alerts in priority order.".to_string()],
    }
}

fn fallback_draft(req: &DraftRequest) -> DraftContent {
    let greeting = match &req.client_name {
        Some(name) => format!("Dear {name},"),
        None => "Dear client,".to_string(),
    };
    DraftContent {
        subject: format!("A quick review of your portfolio: {}", req.event_type.label()),
        body: format!(
            "{greeting}\n\nDuring our regular review we noticed the following: {}\n\n\
I would welcome a short call to talk through the options.\n\nKind regards",
            req.reason
        ),
    }
}

pub fn fallback_brief(ctx: &BriefContext, error: String) -> BriefPayload {
    let sectors = ctx
        .top_sectors
        .iter()
        .take(3)
        .map(|(sector, exposure)| format!("{sector} {:.0}%", exposure * 100.0))
        .collect::<Vec<_>>()
        .join(", ");

    let mut tax_opportunities = Vec::new();
    if ctx.isa_allowance_remaining > 0.0 {
        tax_opportunities.push(format!(
            "{} ISA allowance remaining.",
            gbp(ctx.isa_allowance_remaining)
        ));
    }
    if ctx.unrealized_gains > 0.0 {
        tax_opportunities.push(format!("{} unrealised gains.", gbp(ctx.unrealized_gains)));
    }

    let priority = ctx
        .open_risks
        .first()
        .cloned()
        .unwrap_or_else(|| "General portfolio review.".to_string());

    BriefPayload {
        client_summary: format!(
            "{}: portfolio {} with {} cash.",
            ctx.client_name,
            gbp(ctx.total_value),
            gbp(ctx.cash_balance)
        ),
        priority_talking_point: priority,
        talking_points: ctx.open_risks.clone(),
        agenda: vec![
            "Review portfolio performance".to_string(),
            "Confirm objectives and risk appetite".to_string(),
            "Agree next steps".to_string(),
        ],
        compliance_reminders: vec![
            "Confirm there are no changes to circumstances or vulnerability.".to_string(),
        ],
        tax_opportunities,
        recent_life_events: ctx.memories.iter().take(3).cloned().collect(),
        risk_alignment: format!(
            "Target risk {:.1}, current {:.1}.",
            ctx.target_risk_score, ctx.current_risk_score
        ),
        portfolio_performance: if sectors.is_empty() {
            "No holdings on record.".to_string()
        } else {
            format!("Largest sectors: {sectors}.")
        },
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Classification, SuggestedAction, Urgency};
    use crate::llm::DisabledNarrativeClient;
    use crate::testing::FakeNarrative;

    fn request() -> InterpretRequest {
        InterpretRequest {
            event_type: EventType::ComplianceExposure,
            urgency: Urgency::Medium,
            reason: "Mandate Drift: Client target is 3, currently operating at 4.0".to_string(),
            classification: Classification::MandateDrift {
                drift: 1.0,
                threshold: 0.5,
                target: 3.0,
                current: 4.0,
            },
            client_name: Some("Jane Doe".to_string()),
            memory_summary: String::new(),
            market_summary: String::new(),
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let fake = Arc::new(FakeNarrative::default());
        fake.fail_next(1);
        let gateway = NarrativeGateway::new(fake.clone(), Duration::from_secs(1), 1);
        let n = gateway.interpret(&request()).await;
        assert!(!n.is_fallback());
        assert_eq!(fake.interpret_calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back() {
        let fake = Arc::new(FakeNarrative::default());
        fake.fail_next(5);
        let gateway = NarrativeGateway::new(fake.clone(), Duration::from_secs(1), 1);
        let n = gateway.interpret(&request()).await;
        assert!(n.is_fallback());
        assert_eq!(n.headline, "Risk detected: compliance_exposure");
        assert_eq!(n.suggested_action, SuggestedAction::Dismiss);
        assert_eq!(fake.interpret_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_collaborator_times_out() {
        let fake = Arc::new(FakeNarrative::default());
        fake.set_delay(Duration::from_secs(60));
        let gateway = NarrativeGateway::new(fake, Duration::from_secs(2), 0);
        let n = gateway.interpret(&request()).await;
        assert!(n.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn disabled_client_uses_fallback_master() {
        let gateway =
            NarrativeGateway::new(Arc::new(DisabledNarrativeClient), Duration::from_secs(1), 3);
        let roster = vec![RosterEntry {
            name: "Jane Doe".to_string(),
            vulnerability_category: "Health".to_string(),
        }];
        let master = gateway.summarize_book(&roster, &MarketContext::default()).await;
        assert!(master.is_fallback());
        let value = master.value();
        assert_eq!(value.title, FALLBACK_MASTER_TITLE);
        assert_eq!(value.top_risks, vec!["Jane Doe (Health)".to_string()]);
        assert_eq!(value.market_summary, "No market context available.");
    }

    fn brief_context() -> BriefContext {
        BriefContext {
            client_name: "Jane Doe".to_string(),
            total_value: 250_000.0,
            cash_balance: 12_000.0,
            top_sectors: vec![("Energy".to_string(), 0.42)],
            target_risk_score: 5.0,
            current_risk_score: 6.0,
            isa_allowance_remaining: 20_000.0,
            unrealized_gains: 0.0,
            estimated_gross_income: 90_000.0,
            memories: vec!["Daughter starting university".to_string()],
            open_risks: vec![],
        }
    }

    #[test]
    fn fallback_brief_carries_error_and_context() {
        let brief = fallback_brief(&brief_context(), "timeout".to_string());
        assert_eq!(brief.error.as_deref(), Some("timeout"));
        assert_eq!(brief.client_summary, "Jane Doe: portfolio £250,000 with £12,000 cash.");
        assert_eq!(brief.tax_opportunities, vec!["£20,000 ISA allowance remaining.".to_string()]);
        assert_eq!(brief.portfolio_performance, "Largest sectors: Energy 42%.");
    }

    #[tokio::test]
    async fn blank_brief_reply_uses_fallback() {
        let fake = Arc::new(FakeNarrative::default());
        fake.reply_brief(serde_json::from_value(serde_json::json!({})).unwrap());
        let gateway = NarrativeGateway::new(fake, Duration::from_secs(1), 0);

        let brief = gateway.meeting_brief(Uuid::new_v4(), &brief_context()).await;
        assert_eq!(brief.error.as_deref(), Some("incomplete brief"));
        assert_eq!(brief.client_summary, "Jane Doe: portfolio £250,000 with £12,000 cash.");
    }

    #[tokio::test]
    async fn brief_with_talking_points_is_accepted() {
        let fake = Arc::new(FakeNarrative::default());
        fake.reply_brief(BriefPayload {
            client_summary: "Steady year".to_string(),
            talking_points: vec!["ISA top-up".to_string()],
            ..BriefPayload::default()
        });
        let gateway = NarrativeGateway::new(fake, Duration::from_secs(1), 0);

        let brief = gateway.meeting_brief(Uuid::new_v4(), &brief_context()).await;
        assert_eq!(brief.error, None);
        assert_eq!(brief.client_summary, "Steady year");
    }

    #[tokio::test]
    async fn blank_master_reply_uses_fallback() {
        let fake = Arc::new(FakeNarrative::default());
        fake.reply_master(MasterNarrative::default());
        let gateway = NarrativeGateway::new(fake, Duration::from_secs(1), 0);

        let master = gateway.summarize_book(&[], &MarketContext::default()).await;
        assert_eq!(master.error(), Some("incomplete master narrative"));
        assert_eq!(master.value().title, FALLBACK_MASTER_TITLE);
        assert!(!master.value().bullets.is_empty());
    }

    #[tokio::test]
    async fn untitled_master_with_bullets_keeps_generated_text() {
        let fake = Arc::new(FakeNarrative::default());
        fake.reply_master(MasterNarrative {
            bullets: vec!["Energy down".to_string()],
            ..MasterNarrative::default()
        });
        let gateway = NarrativeGateway::new(fake, Duration::from_secs(1), 0);

        let master = gateway.summarize_book(&[], &MarketContext::default()).await;
        assert!(!master.is_fallback());
        assert_eq!(master.value().title, FALLBACK_MASTER_TITLE);
        assert_eq!(master.value().bullets, vec!["Energy down".to_string()]);
    }
}
