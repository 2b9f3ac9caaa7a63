use crate::domain::signed_pct;
use crate::ingest::provider::{MarketDataProvider, DEFAULT_GEOPOLITICAL_QUERY, DEFAULT_NEWS_QUERY};
use crate::ingest::types::LiveIndices;
use std::time::Duration;

const NEWS_LIMIT: usize = 5;
const DIGEST_HEADLINES: usize = 3;
const DIGEST_GEOPOLITICAL: usize = 2;

/// Shared market backdrop for one sweep. Any part may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketContext {
    pub indices: Option<LiveIndices>,
    pub news_headlines: Vec<String>,
    pub geopolitical: Vec<String>,
}

impl MarketContext {
    pub fn is_empty(&self) -> bool {
        self.indices.is_none() && self.news_headlines.is_empty() && self.geopolitical.is_empty()
    }

    /// Compact text handed to the narrative collaborator.
    pub fn digest(&self) -> String {
        if self.is_empty() {
            return "No market context available.".to_string();
        }

        let mut out = String::from("Latest Market Intelligence:\n");
        if let Some(indices) = &self.indices {
            out.push_str(&format!(
                "- Indices: FTSE 100 ({:.2}), FTSE 250 ({:.2})\n",
                indices.ftse_100, indices.ftse_250
            ));
            if !indices.sector_performance.is_empty() {
                let sectors = indices
                    .sector_performance
                    .iter()
                    .map(|(sector, v)| format!("{sector}: {}", signed_pct(*v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("- Sector Performance: {sectors}\n"));
            }
        }
        if !self.news_headlines.is_empty() {
            let news: Vec<&str> = self
                .news_headlines
                .iter()
                .take(DIGEST_HEADLINES)
                .map(String::as_str)
                .collect();
            out.push_str(&format!("- Key Headlines: {}\n", news.join(" | ")));
        }
        if !self.geopolitical.is_empty() {
            let geo: Vec<&str> = self
                .geopolitical
                .iter()
                .take(DIGEST_GEOPOLITICAL)
                .map(String::as_str)
                .collect();
            out.push_str(&format!("- Geopolitical Context: {}\n", geo.join(" | ")));
        }
        out
    }
}

/// Fetches indices, news and geopolitical headlines in parallel. Each part that fails
/// or exceeds `timeout` is left empty.
pub async fn fetch_market_context(
    provider: &dyn MarketDataProvider,
    timeout: Duration,
) -> MarketContext {
    let (indices, news, geo) = tokio::join!(
        tokio::time::timeout(timeout, provider.fetch_live_indices()),
        tokio::time::timeout(
            timeout,
            provider.fetch_news_headlines(DEFAULT_NEWS_QUERY, NEWS_LIMIT)
        ),
        tokio::time::timeout(
            timeout,
            provider.fetch_geopolitical_context(DEFAULT_GEOPOLITICAL_QUERY, NEWS_LIMIT)
        ),
    );

    MarketContext {
        indices: settle("indices", indices),
        news_headlines: settle("news", news).unwrap_or_default(),
        geopolitical: settle("geopolitical", geo).unwrap_or_default(),
    }
}

fn settle<T>(
    part: &'static str,
    res: Result<anyhow::Result<T>, tokio::time::error::Elapsed>,
) -> Option<T> {
    match res {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            tracing::warn!(part, error = %err, "market context fetch failed; using empty");
            None
        }
        Err(_) => {
            tracing::warn!(part, "market context fetch timed out; using empty");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::provider::DisabledMarketProvider;
    use crate::testing::FakeMarket;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn disabled_provider_degrades_to_empty_context() {
        let ctx = fetch_market_context(&DisabledMarketProvider, Duration::from_secs(1)).await;
        assert!(ctx.is_empty());
        assert_eq!(ctx.digest(), "No market context available.");
    }

    #[tokio::test]
    async fn partial_failures_keep_other_parts() {
        let market = FakeMarket::new(8000.0, &[("Energy", -0.02)]);
        market.set_news(vec!["BoE holds".to_string()]);
        market.fail_geopolitics();
        let ctx = fetch_market_context(&market, Duration::from_secs(1)).await;
        assert!(ctx.indices.is_some());
        assert_eq!(ctx.news_headlines, vec!["BoE holds".to_string()]);
        assert!(ctx.geopolitical.is_empty());
    }

    #[test]
    fn digest_caps_headlines_and_signs_sectors() {
        let ctx = MarketContext {
            indices: Some(LiveIndices {
                ftse_100: 8000.0,
                ftse_250: 20000.0,
                sector_performance: BTreeMap::from([
                    ("Energy".to_string(), -0.065),
                    ("Tech".to_string(), 0.012),
                ]),
                as_of: None,
            }),
            news_headlines: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            geopolitical: vec!["x".into(), "y".into(), "z".into()],
        };
        let digest = ctx.digest();
        assert!(digest.contains("FTSE 100 (8000.00)"));
        assert!(digest.contains("Energy: -6.5%, Tech: +1.2%"));
        assert!(digest.contains("Key Headlines: a | b | c\n"));
        assert!(digest.contains("Geopolitical Context: x | y\n"));
    }
}
