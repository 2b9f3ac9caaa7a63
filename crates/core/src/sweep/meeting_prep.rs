use crate::domain::client::Client;
use crate::domain::records::SweepKind;
use crate::llm::BriefContext;
use crate::storage::NewBrief;
use crate::sweep::{SweepContext, SweepReport};
use crate::time::schedule::start_of_day;
use chrono::{Duration, Utc};
use std::collections::HashSet;

const MEMORY_FOR_BRIEF: usize = 5;
const TOP_SECTORS: usize = 5;

/// Meeting-prep sweep: at most one brief-generation call per invocation, for the first
/// client without a brief created today.
pub async fn run(ctx: &SweepContext) -> anyhow::Result<SweepReport> {
    let mut report = SweepReport::new(SweepKind::MeetingPrep);
    let now = Utc::now();

    let briefed: HashSet<_> = ctx
        .store
        .briefs_since(start_of_day(now))
        .await?
        .into_iter()
        .map(|b| b.client_id)
        .collect();

    for client in ctx.store.list_clients().await? {
        if briefed.contains(&client.id) {
            continue;
        }

        let brief_ctx = match brief_context(ctx, &client).await {
            Ok(brief_ctx) => brief_ctx,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(client_id = %client.id, error = %err, "brief context failed; trying next client");
                continue;
            }
        };

        report.scanned = 1;
        let payload = ctx.narrative.meeting_brief(client.id, &brief_ctx).await;
        let fallback = payload.error.is_some();
        ctx.store
            .insert_brief(&NewBrief {
                client_id: client.id,
                meeting_at: now + Duration::hours(1),
                payload,
            })
            .await?;
        report.accepted = 1;
        report.summary = if fallback {
            format!("Fallback meeting brief stored for {}.", client.full_name())
        } else {
            format!("Meeting brief prepared for {}.", client.full_name())
        };
        return Ok(report);
    }

    report.summary = "All clients already have a brief today.".to_string();
    Ok(report)
}

async fn brief_context(ctx: &SweepContext, client: &Client) -> anyhow::Result<BriefContext> {
    let portfolio = ctx.store.get_portfolio(client.id).await?;
    let memories = ctx
        .store
        .recent_memory(client.id, MEMORY_FOR_BRIEF)
        .await?
        .into_iter()
        .map(|m| m.content)
        .collect();
    let open_risks = ctx
        .store
        .list_open_events()
        .await?
        .into_iter()
        .filter(|e| e.client_id == Some(client.id))
        .map(|e| e.reason())
        .collect();

    let (total_value, cash_balance, top_sectors, target, current, gains) = match &portfolio {
        Some(p) => (
            p.total_value(),
            p.cash_balance,
            p.sector_exposures().into_iter().take(TOP_SECTORS).collect(),
            p.target_risk_score,
            p.current_risk_score,
            p.unrealized_gains,
        ),
        None => (0.0, 0.0, Vec::new(), 0.0, 0.0, 0.0),
    };

    Ok(BriefContext {
        client_name: client.full_name(),
        total_value,
        cash_balance,
        top_sectors,
        target_risk_score: target,
        current_risk_score: current,
        isa_allowance_remaining: client.tax_profile.isa_allowance_remaining,
        unrealized_gains: gains,
        estimated_gross_income: client.tax_profile.estimated_gross_income,
        memories,
        open_risks,
    })
}
