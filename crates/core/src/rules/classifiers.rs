use crate::domain::client::Client;
use crate::domain::event::{Classification, Finding, Urgency};
use crate::domain::market::MarketSnapshot;
use crate::domain::portfolio::Portfolio;
use crate::rules::uk_finance;

const CONCENTRATION_LIMIT: f64 = 0.30;
const CONCENTRATION_HIGH: f64 = 0.45;
const SENSITIVITY_LIMIT: f64 = 0.004;
const SENSITIVITY_HIGH: f64 = 0.01;
const PENSION_HIGH_BELOW: f64 = 20_000.0;
const CONSERVATIVE_TARGET_BELOW: f64 = 4.0;
const CONSERVATIVE_DRIFT: f64 = 0.5;
const STANDARD_DRIFT: f64 = 1.2;
const PANIC_TRIGGER: f64 = 6.0;
const PANIC_HIGH: f64 = 8.0;
const PANIC_PERF_TRIGGER: f64 = -0.01;
const ANY_CLIENT_PERF_TRIGGER: f64 = -0.04;
const VULNERABILITY_LIMIT: f64 = 0.5;
const VULNERABILITY_HIGH: f64 = 0.7;

fn urgency_if(high: bool) -> Urgency {
    if high {
        Urgency::High
    } else {
        Urgency::Medium
    }
}

/// Holding exposures summed per sector, in order of first appearance.
fn sector_totals(portfolio: &Portfolio) -> Vec<(&str, f64)> {
    let mut totals: Vec<(&str, f64)> = Vec::new();
    for holding in &portfolio.holdings {
        match totals.iter_mut().find(|(s, _)| *s == holding.sector) {
            Some((_, exposure)) => *exposure += holding.exposure,
            None => totals.push((holding.sector.as_str(), holding.exposure)),
        }
    }
    totals
}

pub fn concentration(client: &Client, portfolio: &Portfolio) -> Option<Finding> {
    sector_totals(portfolio)
        .into_iter()
        .find(|(_, exposure)| *exposure > CONCENTRATION_LIMIT)
        .map(|(sector, exposure)| {
            Finding::for_client(
                client.id,
                urgency_if(exposure > CONCENTRATION_HIGH),
                Classification::Concentration {
                    sector: sector.to_string(),
                    exposure,
                },
            )
        })
}

pub fn sensitivity(
    client: &Client,
    portfolio: &Portfolio,
    snapshot: &MarketSnapshot,
) -> Option<Finding> {
    sector_totals(portfolio)
        .into_iter()
        .find_map(|(sector, exposure)| {
            let performance = snapshot.sector_move(sector);
            if performance >= 0.0 {
                return None;
            }
            let risk_score = exposure * performance.abs();
            (risk_score > SENSITIVITY_LIMIT).then(|| {
                Finding::for_client(
                    client.id,
                    urgency_if(risk_score > SENSITIVITY_HIGH),
                    Classification::Sensitivity {
                        sector: sector.to_string(),
                        exposure,
                        performance,
                        risk_score,
                    },
                )
            })
        })
}

pub fn isa_allowance(client: &Client, portfolio: &Portfolio) -> Option<Finding> {
    let isa_remaining = client.tax_profile.isa_allowance_remaining;
    let cash_balance = portfolio.cash_balance;
    uk_finance::isa_opportunity(isa_remaining, cash_balance).then(|| {
        Finding::for_client(
            client.id,
            Urgency::Medium,
            Classification::IsaAllowance {
                isa_remaining,
                cash_balance,
            },
        )
    })
}

pub fn cgt_exposure(client: &Client, portfolio: &Portfolio) -> Option<Finding> {
    let unrealized_gains = portfolio.unrealized_gains;
    uk_finance::cgt_exposure(unrealized_gains).then(|| {
        Finding::for_client(
            client.id,
            Urgency::Medium,
            Classification::CgtExposure { unrealized_gains },
        )
    })
}

pub fn pension_taper(client: &Client) -> Option<Finding> {
    let income = client.tax_profile.estimated_gross_income;
    if income <= uk_finance::PENSION_CHECK_INCOME {
        return None;
    }
    let available_allowance = uk_finance::pension_annual_allowance(income);
    (available_allowance < uk_finance::STANDARD_PENSION_ALLOWANCE).then(|| {
        Finding::for_client(
            client.id,
            urgency_if(available_allowance < PENSION_HIGH_BELOW),
            Classification::PensionTaper {
                income,
                available_allowance,
            },
        )
    })
}

pub fn mandate_drift(client: &Client, portfolio: &Portfolio) -> Option<Finding> {
    let target = portfolio.target_risk_score;
    let current = portfolio.current_risk_score;
    let drift = (current - target).abs();
    let threshold = if target < CONSERVATIVE_TARGET_BELOW {
        CONSERVATIVE_DRIFT
    } else {
        STANDARD_DRIFT
    };
    (drift >= threshold).then(|| {
        Finding::for_client(
            client.id,
            urgency_if(drift > threshold * 2.0),
            Classification::MandateDrift {
                drift,
                threshold,
                target,
                current,
            },
        )
    })
}

pub fn behavioural_friction(client: &Client, snapshot: &MarketSnapshot) -> Option<Finding> {
    let profile = &client.behavioural_profile;
    let perf = snapshot.sector_move(&profile.sensitivity_sector);
    let triggered = (profile.panic_score >= PANIC_TRIGGER && perf < PANIC_PERF_TRIGGER)
        || perf < ANY_CLIENT_PERF_TRIGGER;
    triggered.then(|| {
        Finding::for_client(
            client.id,
            urgency_if(profile.panic_score > PANIC_HIGH),
            Classification::BehaviouralFriction {
                panic_score: profile.panic_score,
                trigger_sector: profile.sensitivity_sector.clone(),
                trigger_performance: perf,
            },
        )
    })
}

pub fn vulnerability_alert(client: &Client) -> Option<Finding> {
    let v = &client.vulnerability;
    (v.score > VULNERABILITY_LIMIT).then(|| {
        Finding::for_client(
            client.id,
            urgency_if(v.score > VULNERABILITY_HIGH),
            Classification::Vulnerability {
                score: v.score,
                category: v.category.clone(),
                notes: v.notes.clone(),
            },
        )
    })
}
