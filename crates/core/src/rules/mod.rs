//! Deterministic rule engine. Every rule is a pure function of the subject state;
//! [`evaluate`] applies them in a fixed precedence order and keeps at most one
//! finding per event type.

pub mod classifiers;
pub mod uk_finance;
pub mod vulnerability;

use crate::domain::client::Client;
use crate::domain::event::{EventType, Finding};
use crate::domain::market::MarketSnapshot;
use crate::domain::portfolio::Portfolio;

/// Everything a per-client rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct SubjectState<'a> {
    pub client: &'a Client,
    pub portfolio: &'a Portfolio,
    pub snapshot: &'a MarketSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSet {
    /// Book and pulse-triggered sweeps.
    Book,
    /// Overnight macro sweep: the book rules plus the vulnerability alert.
    Macro,
}

type Rule = fn(&SubjectState<'_>) -> Option<Finding>;

#[derive(Clone, Copy)]
pub struct RuleEntry {
    pub name: &'static str,
    pub event_type: EventType,
    pub macro_only: bool,
    pub rule: Rule,
}

/// Precedence order. Within one event type the first rule that fires wins.
pub const PRECEDENCE: &[RuleEntry] = &[
    RuleEntry {
        name: "concentration",
        event_type: EventType::MarketRisk,
        macro_only: false,
        rule: |s| classifiers::concentration(s.client, s.portfolio),
    },
    RuleEntry {
        name: "sensitivity",
        event_type: EventType::MarketRisk,
        macro_only: false,
        rule: |s| classifiers::sensitivity(s.client, s.portfolio, s.snapshot),
    },
    RuleEntry {
        name: "isa_allowance",
        event_type: EventType::TaxOpportunity,
        macro_only: false,
        rule: |s| classifiers::isa_allowance(s.client, s.portfolio),
    },
    RuleEntry {
        name: "cgt_exposure",
        event_type: EventType::TaxOpportunity,
        macro_only: false,
        rule: |s| classifiers::cgt_exposure(s.client, s.portfolio),
    },
    RuleEntry {
        name: "pension_taper",
        event_type: EventType::TaxOpportunity,
        macro_only: false,
        rule: |s| classifiers::pension_taper(s.client),
    },
    RuleEntry {
        name: "mandate_drift",
        event_type: EventType::ComplianceExposure,
        macro_only: false,
        rule: |s| classifiers::mandate_drift(s.client, s.portfolio),
    },
    RuleEntry {
        name: "behavioural_friction",
        event_type: EventType::BehaviouralRisk,
        macro_only: false,
        rule: |s| classifiers::behavioural_friction(s.client, s.snapshot),
    },
    RuleEntry {
        name: "vulnerability_alert",
        event_type: EventType::VulnerabilityAlert,
        macro_only: true,
        rule: |s| classifiers::vulnerability_alert(s.client),
    },
];

pub fn evaluate(state: &SubjectState<'_>, rule_set: RuleSet) -> Vec<Finding> {
    let mut findings: Vec<Finding> = Vec::new();
    for entry in PRECEDENCE {
        if entry.macro_only && rule_set != RuleSet::Macro {
            continue;
        }
        if findings.iter().any(|f| f.event_type() == entry.event_type) {
            continue;
        }
        if let Some(finding) = (entry.rule)(state) {
            tracing::trace!(rule = entry.name, client_id = %state.client.id, "rule fired");
            findings.push(finding);
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Classification;
    use crate::testing::{client, portfolio_with, snapshot_with};

    #[test]
    fn concentration_takes_priority_over_sensitivity() {
        let c = client();
        let p = portfolio_with(&c, &[("Energy", 0.2), ("Tech", 0.4)], 0.0);
        let s = snapshot_with(&[("Energy", -0.05)]);
        let findings = evaluate(
            &SubjectState {
                client: &c,
                portfolio: &p,
                snapshot: &s,
            },
            RuleSet::Book,
        );
        let market: Vec<_> = findings
            .iter()
            .filter(|f| f.event_type() == EventType::MarketRisk)
            .collect();
        assert_eq!(market.len(), 1);
        assert!(matches!(
            market[0].classification,
            Classification::Concentration { .. }
        ));
    }

    #[test]
    fn isa_beats_cgt_and_pension() {
        let mut c = client();
        c.tax_profile.isa_allowance_remaining = 20_000.0;
        c.tax_profile.estimated_gross_income = 400_000.0;
        let mut p = portfolio_with(&c, &[], 50_000.0);
        p.unrealized_gains = 9_000.0;
        let s = snapshot_with(&[]);
        let findings = evaluate(
            &SubjectState {
                client: &c,
                portfolio: &p,
                snapshot: &s,
            },
            RuleSet::Book,
        );
        let tax: Vec<_> = findings
            .iter()
            .filter(|f| f.event_type() == EventType::TaxOpportunity)
            .collect();
        assert_eq!(tax.len(), 1);
        assert!(matches!(tax[0].classification, Classification::IsaAllowance { .. }));
    }

    #[test]
    fn vulnerability_only_in_macro_rule_set() {
        let mut c = client();
        c.vulnerability.score = 0.9;
        let p = portfolio_with(&c, &[], 0.0);
        let s = snapshot_with(&[]);
        let state = SubjectState {
            client: &c,
            portfolio: &p,
            snapshot: &s,
        };
        assert!(!evaluate(&state, RuleSet::Book)
            .iter()
            .any(|f| f.event_type() == EventType::VulnerabilityAlert));
        assert!(evaluate(&state, RuleSet::Macro)
            .iter()
            .any(|f| f.event_type() == EventType::VulnerabilityAlert));
    }

    #[test]
    fn multiple_event_types_for_one_client() {
        let mut c = client();
        c.behavioural_profile.panic_score = 7.0;
        c.behavioural_profile.sensitivity_sector = "Energy".to_string();
        let mut p = portfolio_with(&c, &[("Energy", 0.5)], 0.0);
        p.target_risk_score = 3.0;
        p.current_risk_score = 5.0;
        let s = snapshot_with(&[("Energy", -0.02)]);
        let types: Vec<EventType> = evaluate(
            &SubjectState {
                client: &c,
                portfolio: &p,
                snapshot: &s,
            },
            RuleSet::Book,
        )
        .iter()
        .map(Finding::event_type)
        .collect();
        assert_eq!(
            types,
            vec![
                EventType::MarketRisk,
                EventType::ComplianceExposure,
                EventType::BehaviouralRisk
            ]
        );
    }
}
