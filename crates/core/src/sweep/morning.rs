use crate::dedup::Admission;
use crate::domain::event::{Classification, Finding, Narrative, SuggestedAction, Urgency};
use crate::domain::records::SweepKind;
use crate::ingest::fetch_market_context;
use crate::llm::{Enriched, MasterNarrative, RosterEntry};
use crate::rules::RuleSet;
use crate::sweep::book::{latest_or_empty, scan_book, ScanOptions};
use crate::sweep::{SweepContext, SweepReport};

/// Macro sweep: the singleton master brief first, then the full per-client rule set
/// (including vulnerability alerts) against the latest snapshot.
pub async fn run(ctx: &SweepContext) -> anyhow::Result<SweepReport> {
    let mut report = SweepReport::new(SweepKind::Macro);

    let clients = ctx.store.list_clients().await?;
    if clients.is_empty() {
        report.summary = "No clients in the book; morning brief skipped.".to_string();
        return Ok(report);
    }

    let market = fetch_market_context(ctx.market.as_ref(), ctx.tunables.market_context_timeout).await;
    let roster: Vec<RosterEntry> = clients
        .iter()
        .map(|c| RosterEntry {
            name: c.full_name(),
            vulnerability_category: c.vulnerability.category.clone(),
        })
        .collect();

    let master = ctx.narrative.summarize_book(&roster, &market).await;
    let master_state = match ctx.gate().admit(&master_finding(master.value())).await? {
        Admission::Accepted(event) => {
            ctx.store
                .update_event_interpretation(event.id, &master_narrative(&master))
                .await?;
            report.accepted += 1;
            "created"
        }
        Admission::Suppressed => {
            tracing::info!("morning master brief already open");
            report.suppressed += 1;
            "already open"
        }
    };

    let snapshot = latest_or_empty(ctx).await?;
    scan_book(
        ctx,
        &snapshot,
        &market,
        ScanOptions {
            rule_set: RuleSet::Macro,
            assess_vulnerability: false,
        },
        &mut report,
    )
    .await?;

    report.summary = format!(
        "Macro sweep complete. Master brief {master_state}. {} portfolios scanned. {} events found.",
        report.scanned, report.accepted
    );
    Ok(report)
}

fn master_finding(master: &MasterNarrative) -> Finding {
    Finding::book_wide(
        Urgency::High,
        Classification::MorningBrief {
            title: master.title.clone(),
            bullets: master.bullets.clone(),
            market_summary: master.market_summary.clone(),
            critical_news: master.critical_news.clone(),
            top_risks: master.top_risks.clone(),
            suggested_actions: master.suggested_actions.clone(),
        },
    )
}

fn master_narrative(master: &Enriched<MasterNarrative>) -> Narrative {
    let value = master.value();
    Narrative {
        headline: value.title.clone(),
        consequence_if_ignored: value.market_summary.clone(),
        behavioural_nuance: if value.top_risks.is_empty() {
            "No client-specific risks flagged.".to_string()
        } else {
            value.top_risks.join("; ")
        },
        suggested_action: SuggestedAction::Dismiss,
        error: master.error().map(str::to_string),
    }
}
