use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    #[serde(default = "unknown_sector")]
    pub sector: String,
    pub quantity: f64,
    /// GBP per unit.
    pub unit_price: f64,
    /// Fraction of total portfolio value (holdings + cash).
    #[serde(default)]
    pub exposure: f64,
}

fn unknown_sector() -> String {
    "Unknown".to_string()
}

impl Holding {
    pub fn value(&self) -> f64 {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub client_id: Uuid,
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub cash_balance: f64,
    #[serde(default)]
    pub unrealized_gains: f64,
    #[serde(default = "default_risk_score")]
    pub target_risk_score: f64,
    #[serde(default = "default_risk_score")]
    pub current_risk_score: f64,
    pub updated_at: DateTime<Utc>,
}

fn default_risk_score() -> f64 {
    5.0
}

impl Portfolio {
    pub fn holdings_value(&self) -> f64 {
        self.holdings.iter().map(Holding::value).sum()
    }

    pub fn total_value(&self) -> f64 {
        self.holdings_value() + self.cash_balance
    }

    pub fn cash_fraction(&self) -> f64 {
        let total = self.total_value();
        if total > 0.0 {
            self.cash_balance / total
        } else {
            0.0
        }
    }

    /// Holding exposures summed per sector, largest first (ties by sector name).
    pub fn sector_exposures(&self) -> Vec<(String, f64)> {
        let mut by_sector: BTreeMap<&str, f64> = BTreeMap::new();
        for holding in &self.holdings {
            *by_sector.entry(holding.sector.as_str()).or_insert(0.0) += holding.exposure;
        }

        let mut out: Vec<(String, f64)> = by_sector
            .into_iter()
            .map(|(sector, exposure)| (sector.to_string(), exposure))
            .collect();
        out.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        out
    }

    /// Live view: every holding revalued at its quoted price (stored price when no quote),
    /// exposures recomputed against holdings + cash. The stored record is untouched.
    pub fn repriced(&self, quotes: &HashMap<String, f64>) -> Portfolio {
        let mut live = self.clone();
        for holding in &mut live.holdings {
            if let Some(price) = quotes.get(&holding.ticker).copied() {
                if price.is_finite() && price > 0.0 {
                    holding.unit_price = price;
                }
            }
        }

        let total = live.total_value();
        for holding in &mut live.holdings {
            holding.exposure = if total > 0.0 {
                holding.value() / total
            } else {
                0.0
            };
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(ticker: &str, sector: &str, quantity: f64, unit_price: f64) -> Holding {
        Holding {
            ticker: ticker.to_string(),
            sector: sector.to_string(),
            quantity,
            unit_price,
            exposure: 0.0,
        }
    }

    fn portfolio(holdings: Vec<Holding>, cash: f64) -> Portfolio {
        Portfolio {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            holdings,
            cash_balance: cash,
            unrealized_gains: 0.0,
            target_risk_score: 5.0,
            current_risk_score: 5.0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn repriced_exposures_plus_cash_sum_to_one() {
        let base = portfolio(
            vec![
                holding("SHEL", "Energy", 100.0, 25.0),
                holding("AZN", "Healthcare", 10.0, 110.0),
                holding("HSBA", "Financials", 300.0, 6.5),
            ],
            4_000.0,
        );
        let quotes = HashMap::from([("SHEL".to_string(), 27.5), ("AZN".to_string(), 105.0)]);

        let live = base.repriced(&quotes);
        let sum: f64 = live.holdings.iter().map(|h| h.exposure).sum::<f64>() + live.cash_fraction();
        assert!((sum - 1.0).abs() < 1e-9, "sum was {sum}");
        assert_eq!(live.holdings[0].unit_price, 27.5);
        // No quote for HSBA: stored price is kept.
        assert_eq!(live.holdings[2].unit_price, 6.5);
        // Base record untouched.
        assert_eq!(base.holdings[0].unit_price, 25.0);
    }

    #[test]
    fn repriced_ignores_non_positive_quotes() {
        let base = portfolio(vec![holding("BP", "Energy", 10.0, 5.0)], 0.0);
        let quotes = HashMap::from([("BP".to_string(), 0.0)]);
        let live = base.repriced(&quotes);
        assert_eq!(live.holdings[0].unit_price, 5.0);
        assert!((live.holdings[0].exposure - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_portfolio_has_zero_exposures() {
        let live = portfolio(vec![holding("X", "Tech", 0.0, 10.0)], 0.0).repriced(&HashMap::new());
        assert_eq!(live.holdings[0].exposure, 0.0);
        assert_eq!(live.cash_fraction(), 0.0);
    }

    #[test]
    fn sector_exposures_aggregate_and_sort() {
        let mut p = portfolio(
            vec![
                holding("A", "Energy", 1.0, 1.0),
                holding("B", "Tech", 1.0, 1.0),
                holding("C", "Energy", 1.0, 1.0),
            ],
            0.0,
        );
        p.holdings[0].exposure = 0.2;
        p.holdings[1].exposure = 0.25;
        p.holdings[2].exposure = 0.1;

        let sectors = p.sector_exposures();
        assert_eq!(sectors[0].0, "Energy");
        assert!((sectors[0].1 - 0.3).abs() < 1e-12);
        assert_eq!(sectors[1].0, "Tech");
    }
}
