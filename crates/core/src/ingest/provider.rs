use crate::config::Settings;
use crate::ingest::types::{HeadlinesResponse, LiveIndices, QuotesResponse};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRIES: u32 = 2;

pub const DEFAULT_NEWS_QUERY: &str = "UK financial markets FTSE today";
pub const DEFAULT_GEOPOLITICAL_QUERY: &str = "geopolitical risk oil energy conflict";

/// Live market data and news. Callers treat every method as unreliable.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_live_indices(&self) -> Result<LiveIndices>;

    async fn fetch_news_headlines(&self, query: &str, limit: usize) -> Result<Vec<String>>;

    async fn fetch_geopolitical_context(&self, query: &str, limit: usize) -> Result<Vec<String>>;

    /// GBP prices keyed by ticker. Tickers without a quote are simply absent.
    async fn fetch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonMarketProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
}

impl HttpJsonMarketProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DATA_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .with_context(|| format!("market data request failed (path={path})"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read market data response")?;
        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("market data response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("market data HTTP {status} (path={path}): {raw_json}");
        }

        serde_json::from_value::<T>(raw_json)
            .with_context(|| format!("unexpected market data payload (path={path})"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(path, query).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_millis(500 << (attempt - 1));
                    tracing::warn!(attempt, path, ?backoff, error = %err, "market data fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonMarketProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_live_indices(&self) -> Result<LiveIndices> {
        let indices: LiveIndices = self.get("/v1/indices", &[]).await?;
        validate_indices(&indices)?;
        Ok(indices)
    }

    async fn fetch_news_headlines(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let res: HeadlinesResponse = self
            .get(
                "/v1/news",
                &[("query", query.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(titles(res, limit))
    }

    async fn fetch_geopolitical_context(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let res: HeadlinesResponse = self
            .get(
                "/v1/geopolitics",
                &[("query", query.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(titles(res, limit))
    }

    async fn fetch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, f64>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }
        let res: QuotesResponse = self
            .get("/v1/quotes", &[("tickers", tickers.join(","))])
            .await?;
        Ok(res
            .quotes
            .into_iter()
            .filter(|(_, price)| price.is_finite() && *price > 0.0)
            .collect())
    }
}

fn validate_indices(indices: &LiveIndices) -> Result<()> {
    anyhow::ensure!(
        indices.ftse_100.is_finite() && indices.ftse_100 > 0.0,
        "ftse_100 must be positive, got {}",
        indices.ftse_100
    );
    anyhow::ensure!(
        indices.sector_performance.values().all(|v| v.is_finite()),
        "sector performance must be finite"
    );
    Ok(())
}

fn titles(res: HeadlinesResponse, limit: usize) -> Vec<String> {
    res.items
        .into_iter()
        .map(|item| item.title.trim().to_string())
        .filter(|title| !title.is_empty())
        .take(limit)
        .collect()
}

/// Used when no provider is configured. Every call fails and callers degrade.
#[derive(Debug, Clone, Default)]
pub struct DisabledMarketProvider;

#[async_trait::async_trait]
impl MarketDataProvider for DisabledMarketProvider {
    fn provider_name(&self) -> &'static str {
        "disabled"
    }

    async fn fetch_live_indices(&self) -> Result<LiveIndices> {
        anyhow::bail!("market data provider not configured")
    }

    async fn fetch_news_headlines(&self, _query: &str, _limit: usize) -> Result<Vec<String>> {
        anyhow::bail!("market data provider not configured")
    }

    async fn fetch_geopolitical_context(&self, _query: &str, _limit: usize) -> Result<Vec<String>> {
        anyhow::bail!("market data provider not configured")
    }

    async fn fetch_quotes(&self, _tickers: &[String]) -> Result<HashMap<String, f64>> {
        anyhow::bail!("market data provider not configured")
    }
}
