use crate::dedup::Admission;
use crate::domain::event::{Classification, Finding, Urgency};
use crate::domain::market::{MarketSnapshot, NewMarketSnapshot};
use crate::domain::records::SweepKind;
use crate::domain::signed_pct;
use crate::ingest::provider::DEFAULT_NEWS_QUERY;
use crate::ingest::types::LiveIndices;
use crate::sweep::{book, SweepContext, SweepReport};
use chrono::Utc;
use uuid::Uuid;

/// Relative FTSE 100 move between readings that counts as abnormal.
pub const INTERRUPT_THRESHOLD: f64 = 0.02;
pub const CRITICAL_THRESHOLD: f64 = 0.05;
const INTERRUPT_HEADLINES: usize = 3;

pub fn index_delta(previous: f64, current: f64) -> Option<f64> {
    (previous > 0.0 && current > 0.0).then(|| (current - previous) / previous)
}

pub fn is_abnormal(delta: f64) -> bool {
    delta.abs() > INTERRUPT_THRESHOLD
}

/// Pulse sweep: compare a fresh reading against the last stored one, raise a market
/// interrupt and run an out-of-cycle book sweep on an abnormal move, then store the reading.
pub async fn run(ctx: &SweepContext) -> anyhow::Result<SweepReport> {
    let mut report = SweepReport::new(SweepKind::Pulse);

    let indices = match tokio::time::timeout(
        ctx.tunables.market_context_timeout,
        ctx.market.fetch_live_indices(),
    )
    .await
    {
        Ok(Ok(indices)) => indices,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "live indices unavailable; pulse skipped");
            report.summary = "Market data unavailable; no snapshot stored.".to_string();
            return Ok(report);
        }
        Err(_) => {
            tracing::warn!("live indices timed out; pulse skipped");
            report.summary = "Market data timed out; no snapshot stored.".to_string();
            return Ok(report);
        }
    };

    let previous = ctx.store.latest_snapshot().await?;
    let delta = previous
        .as_ref()
        .and_then(|prev| index_delta(prev.ftse_100, indices.ftse_100));

    let reading = NewMarketSnapshot {
        taken_at: indices.as_of.unwrap_or_else(Utc::now),
        ftse_100: indices.ftse_100,
        ftse_250: indices.ftse_250,
        sector_performance: indices.sector_performance.clone(),
    };

    report.summary = match (delta, previous.as_ref()) {
        (Some(delta), Some(prev)) if is_abnormal(delta) => {
            tracing::warn!(delta = %signed_pct(delta), ftse_100 = indices.ftse_100, "abnormal market movement");
            let raised = raise_interrupt(ctx, prev.ftse_100, &indices, delta).await?;
            if raised {
                report.accepted += 1;
            } else {
                report.suppressed += 1;
            }

            let fresh = MarketSnapshot {
                id: Uuid::nil(),
                taken_at: reading.taken_at,
                ftse_100: reading.ftse_100,
                ftse_250: reading.ftse_250,
                sector_performance: reading.sector_performance.clone(),
            };
            match book::run(ctx, Some(fresh)).await {
                Ok(book_report) => ctx.finish(&book_report).await,
                Err(err) => tracing::error!(error = %err, "pulse-triggered book sweep aborted"),
            }

            format!(
                "Market pulse: FTSE 100 {:.2} ({}). Interrupt {}; book sweep triggered.",
                indices.ftse_100,
                signed_pct(delta),
                if raised { "raised" } else { "already open" }
            )
        }
        (Some(delta), _) => format!(
            "Market pulse: FTSE 100 {:.2} ({}). No abnormal movement.",
            indices.ftse_100,
            signed_pct(delta)
        ),
        (None, _) => format!(
            "Market pulse: FTSE 100 {:.2}. No previous reading to compare.",
            indices.ftse_100
        ),
    };

    ctx.store.insert_snapshot(&reading).await?;
    Ok(report)
}

/// Admits the book-wide interrupt and narrates it. Returns whether a new event was opened.
async fn raise_interrupt(
    ctx: &SweepContext,
    previous_value: f64,
    indices: &LiveIndices,
    delta: f64,
) -> anyhow::Result<bool> {
    let headlines = match tokio::time::timeout(
        ctx.tunables.market_context_timeout,
        ctx.market
            .fetch_news_headlines(DEFAULT_NEWS_QUERY, INTERRUPT_HEADLINES),
    )
    .await
    {
        Ok(Ok(headlines)) => headlines,
        _ => Vec::new(),
    };

    let exposed_clients = exposed_clients(ctx, indices).await?;
    let urgency = if delta.abs() > CRITICAL_THRESHOLD {
        Urgency::Critical
    } else {
        Urgency::High
    };
    let finding = Finding::book_wide(
        urgency,
        Classification::MarketInterrupt {
            index_delta: delta,
            previous_value,
            current_value: indices.ftse_100,
            headlines: headlines.clone(),
            exposed_clients,
        },
    );

    match ctx.gate().admit(&finding).await? {
        Admission::Accepted(event) => {
            let market_summary = if headlines.is_empty() {
                "No market context available.".to_string()
            } else {
                format!("Key Headlines: {}", headlines.join(" | "))
            };
            ctx.enrich(
                &event,
                None,
                "Book-wide market movement.".to_string(),
                &market_summary,
            )
            .await?;
            Ok(true)
        }
        Admission::Suppressed => Ok(false),
    }
}

/// Names of clients holding any sector that is down in this reading.
async fn exposed_clients(ctx: &SweepContext, indices: &LiveIndices) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for client in ctx.store.list_clients().await? {
        let portfolio = match ctx.store.get_portfolio(client.id).await {
            Ok(Some(portfolio)) => portfolio,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(client_id = %client.id, error = %err, "portfolio read failed; skipping");
                continue;
            }
        };
        let falling = portfolio.holdings.iter().any(|h| {
            indices
                .sector_performance
                .get(&h.sector)
                .is_some_and(|perf| *perf < 0.0)
        });
        if falling {
            names.push(client.full_name());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventType;
    use crate::storage::EntityStore;
    use crate::sweep::tests::{harness, seed};
    use crate::testing::{client_named, portfolio_with, FakeMarket, FakeNarrative};
    use std::collections::BTreeMap;

    async fn store_reading(h: &crate::sweep::tests::Harness, ftse_100: f64) {
        h.store
            .insert_snapshot(&NewMarketSnapshot {
                taken_at: Utc::now() - chrono::Duration::minutes(5),
                ftse_100,
                ftse_250: 20_000.0,
                sector_performance: BTreeMap::new(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn delta_threshold_is_strict() {
        assert!(index_delta(0.0, 8000.0).is_none());
        assert!(!is_abnormal(index_delta(8000.0, 8160.0).unwrap()));
        assert!(is_abnormal(index_delta(8000.0, 8161.0).unwrap()));
        assert!(is_abnormal(index_delta(8000.0, 7800.0).unwrap()));
    }

    #[tokio::test]
    async fn calm_market_only_stores_snapshot() {
        let h = harness(FakeMarket::new(8050.0, &[]), FakeNarrative::default());
        store_reading(&h, 8000.0).await;

        let report = run(&h.ctx).await.unwrap();
        assert_eq!(report.accepted, 0);
        assert!(report.summary.contains("No abnormal movement"));
        assert_eq!(h.store.latest_snapshot().await.unwrap().unwrap().ftse_100, 8050.0);
        assert!(h.store.latest_heartbeat(SweepKind::Book).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sharp_drop_raises_interrupt_and_triggers_book_sweep() {
        let h = harness(
            FakeMarket::new(7500.0, &[("Energy", -0.065)]),
            FakeNarrative::default(),
        );
        h.market.set_news(vec!["Brent collapses".to_string()]);
        store_reading(&h, 8000.0).await;

        let exposed = client_named("Ada", "Lovelace");
        seed(&h, &exposed, &portfolio_with(&exposed, &[("Energy", 0.2)], 80_000.0)).await;
        let safe = client_named("Alan", "Turing");
        seed(&h, &safe, &portfolio_with(&safe, &[("Tech", 0.2)], 80_000.0)).await;

        let report = run(&h.ctx).await.unwrap();
        assert_eq!(report.accepted, 1);

        let interrupts = h
            .store
            .find_open_events_by_type(EventType::MarketInterrupt)
            .await
            .unwrap();
        assert_eq!(interrupts.len(), 1);
        assert_eq!(interrupts[0].urgency, Urgency::Critical);
        assert!(interrupts[0].client_id.is_none());
        match &interrupts[0].classification {
            Classification::MarketInterrupt {
                exposed_clients,
                headlines,
                ..
            } => {
                assert_eq!(exposed_clients, &vec!["Ada Lovelace".to_string()]);
                assert_eq!(headlines, &vec!["Brent collapses".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }

        // The book sweep saw the fresh reading: Energy -6.5% on 20% exposure.
        assert_eq!(
            h.store
                .find_open_events(Some(exposed.id), EventType::MarketRisk)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(h.store.latest_heartbeat(SweepKind::Book).await.unwrap().is_some());
        assert_eq!(h.store.latest_snapshot().await.unwrap().unwrap().ftse_100, 7500.0);

        // A second abnormal reading does not open another interrupt.
        h.market.set_ftse_100(7000.0);
        let again = run(&h.ctx).await.unwrap();
        assert_eq!(again.accepted, 0);
        assert_eq!(again.suppressed, 1);
    }

    #[tokio::test]
    async fn provider_failure_skips_without_error() {
        let h = harness(FakeMarket::new(8000.0, &[]), FakeNarrative::default());
        h.market.fail_indices();
        let report = run(&h.ctx).await.unwrap();
        assert!(report.summary.starts_with("Market data unavailable"));
        assert!(h.store.latest_snapshot().await.unwrap().is_none());
    }
}
