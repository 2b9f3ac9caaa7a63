use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-line index levels plus fractional sector returns (e.g. -0.065 for -6.5%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveIndices {
    pub ftse_100: f64,
    pub ftse_250: f64,
    #[serde(default)]
    pub sector_performance: BTreeMap<String, f64>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlinesResponse {
    pub items: Vec<HeadlineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlineItem {
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotesResponse {
    /// Ticker to GBP price.
    pub quotes: BTreeMap<String, f64>,
}
