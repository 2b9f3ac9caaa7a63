use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Point-in-time index and sector reading. Append-only; the rule engine reads the latest one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub ftse_100: f64,
    pub ftse_250: f64,
    /// Fractional returns per sector, e.g. -0.065 for -6.5%.
    pub sector_performance: BTreeMap<String, f64>,
}

impl MarketSnapshot {
    /// Stand-in used when no snapshot has been stored yet.
    pub fn empty() -> Self {
        Self {
            id: Uuid::nil(),
            taken_at: DateTime::<Utc>::default(),
            ftse_100: 0.0,
            ftse_250: 0.0,
            sector_performance: BTreeMap::new(),
        }
    }

    pub fn sector_move(&self, sector: &str) -> f64 {
        self.sector_performance.get(sector).copied().unwrap_or(0.0)
    }
}

/// New snapshot before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMarketSnapshot {
    pub taken_at: DateTime<Utc>,
    pub ftse_100: f64,
    pub ftse_250: f64,
    pub sector_performance: BTreeMap<String, f64>,
}
