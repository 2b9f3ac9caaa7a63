use crate::dedup::Admission;
use crate::domain::client::Client;
use crate::domain::market::MarketSnapshot;
use crate::domain::portfolio::Portfolio;
use crate::domain::records::SweepKind;
use crate::ingest::{fetch_market_context, MarketContext};
use crate::rules::{self, vulnerability, RuleSet, SubjectState};
use crate::sweep::{memory_summary, SweepContext, SweepReport};
use chrono::Utc;
use std::collections::HashMap;

const MEMORY_SCAN_LIMIT: usize = 10;

/// Options for one pass over the client book.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanOptions {
    pub rule_set: RuleSet,
    pub assess_vulnerability: bool,
}

#[derive(Debug, Default)]
struct ClientOutcome {
    scanned: bool,
    accepted: u32,
    suppressed: u32,
}

/// Book sweep. `snapshot` overrides the stored latest reading (used by the pulse sweep,
/// which has a fresher one in hand).
pub async fn run(ctx: &SweepContext, snapshot: Option<MarketSnapshot>) -> anyhow::Result<SweepReport> {
    let snapshot = match snapshot {
        Some(snapshot) => snapshot,
        None => latest_or_empty(ctx).await?,
    };
    let market = fetch_market_context(ctx.market.as_ref(), ctx.tunables.market_context_timeout).await;

    let mut report = SweepReport::new(SweepKind::Book);
    scan_book(
        ctx,
        &snapshot,
        &market,
        ScanOptions {
            rule_set: RuleSet::Book,
            assess_vulnerability: true,
        },
        &mut report,
    )
    .await?;

    report.summary = format!(
        "Proactive sweep complete. {} portfolios scanned. {} events found. Vulnerability assessments updated.",
        report.scanned, report.accepted
    );
    Ok(report)
}

pub(crate) async fn latest_or_empty(ctx: &SweepContext) -> anyhow::Result<MarketSnapshot> {
    Ok(match ctx.store.latest_snapshot().await? {
        Some(snapshot) => snapshot,
        None => {
            tracing::warn!("no market snapshot stored; sector rules will not fire");
            MarketSnapshot::empty()
        }
    })
}

/// Runs the per-client pipeline for every client. Listing clients is the only fatal step;
/// a failing client is logged and skipped.
pub(crate) async fn scan_book(
    ctx: &SweepContext,
    snapshot: &MarketSnapshot,
    market: &MarketContext,
    opts: ScanOptions,
    report: &mut SweepReport,
) -> anyhow::Result<()> {
    let clients = ctx.store.list_clients().await?;
    let digest = market.digest();

    for client in clients {
        match scan_client(ctx, client.clone(), snapshot, &digest, opts).await {
            Ok(outcome) => {
                if outcome.scanned {
                    report.scanned += 1;
                }
                report.accepted += outcome.accepted;
                report.suppressed += outcome.suppressed;
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(client_id = %client.id, error = %err, "client scan failed; skipping");
            }
        }
    }
    Ok(())
}

async fn scan_client(
    ctx: &SweepContext,
    mut client: Client,
    snapshot: &MarketSnapshot,
    market_digest: &str,
    opts: ScanOptions,
) -> anyhow::Result<ClientOutcome> {
    let mut outcome = ClientOutcome::default();
    let memories: Vec<String> = ctx
        .store
        .recent_memory(client.id, MEMORY_SCAN_LIMIT)
        .await?
        .into_iter()
        .map(|m| m.content)
        .collect();

    let portfolio = match ctx.store.get_portfolio(client.id).await? {
        Some(stored) => Some(live_view(ctx, &stored).await),
        None => None,
    };

    if opts.assess_vulnerability {
        let wealth = portfolio.as_ref().map(Portfolio::total_value).unwrap_or(0.0);
        let assessed = vulnerability::assess(&memories, wealth);
        ctx.store
            .update_client_vulnerability(client.id, &assessed, Utc::now())
            .await?;
        client.vulnerability = assessed;
    }

    let Some(portfolio) = portfolio else {
        tracing::debug!(client_id = %client.id, "no portfolio; skipping rules");
        return Ok(outcome);
    };
    outcome.scanned = true;

    let findings = rules::evaluate(
        &SubjectState {
            client: &client,
            portfolio: &portfolio,
            snapshot,
        },
        opts.rule_set,
    );

    let gate = ctx.gate();
    for finding in findings {
        match gate.admit(&finding).await? {
            Admission::Accepted(event) => {
                outcome.accepted += 1;
                ctx.enrich(
                    &event,
                    Some(client.full_name()),
                    memory_summary(&memories),
                    market_digest,
                )
                .await?;
            }
            Admission::Suppressed => outcome.suppressed += 1,
        }
    }
    Ok(outcome)
}

/// Reprices against live quotes; without quotes the stored prices stand.
async fn live_view(ctx: &SweepContext, stored: &Portfolio) -> Portfolio {
    let tickers: Vec<String> = stored.holdings.iter().map(|h| h.ticker.clone()).collect();
    let quotes = match tokio::time::timeout(
        ctx.tunables.market_context_timeout,
        ctx.market.fetch_quotes(&tickers),
    )
    .await
    {
        Ok(Ok(quotes)) => quotes,
        Ok(Err(err)) => {
            tracing::debug!(client_id = %stored.client_id, error = %err, "quotes unavailable; using stored prices");
            HashMap::new()
        }
        Err(_) => {
            tracing::debug!(client_id = %stored.client_id, "quotes timed out; using stored prices");
            HashMap::new()
        }
    };
    stored.repriced(&quotes)
}
