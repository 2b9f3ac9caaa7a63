//! Display strings for stream entries: chips, drawer titles, clustered summaries.

use crate::domain::event::{Classification, EventType, Narrative, RiskEvent};
use crate::domain::signed_pct;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sector moves beyond this are shown as a live breach rather than an approach.
const BREACH_THRESHOLD: f64 = 0.05;

/// `9:05 AM`-style wall-clock label.
pub fn display_time(at: DateTime<Utc>) -> String {
    at.format("%-I:%M %p").to_string()
}

pub fn chip_label(event_type: EventType) -> &'static str {
    match event_type {
        EventType::BehaviouralRisk => "Behavioural Risk",
        EventType::MarketInterrupt => "Market Interrupt",
        other => other.label(),
    }
}

pub fn chips(event: &RiskEvent) -> Vec<String> {
    let mut chips = vec![chip_label(event.event_type).to_string()];
    if event.event_type != EventType::MorningIntelligence {
        chips.push(format!("Urgency: {}", event.urgency.label()));
    }
    if let Some((sector, perf)) = event.classification.sector_move() {
        chips.push(format!("{sector} {}", signed_pct(perf)));
    }
    chips
}

pub fn drawer_title(event_type: EventType) -> &'static str {
    match event_type {
        EventType::MarketRisk => "Market Risk Analysis",
        EventType::BehaviouralRisk => "Behavioural Risk Intelligence",
        EventType::MarketInterrupt => "Market Interrupt Alert",
        EventType::TaxOpportunity => "Tax Optimisation Window",
        EventType::ComplianceExposure => "Compliance Drift Analysis",
        EventType::VulnerabilityAlert => "Consumer Duty Assessment",
        EventType::MorningIntelligence => "Morning Intelligence Summary",
        EventType::MeetingBrief => "Pre-Meeting Brief",
    }
}

/// Headline of a clustered entry covering `count` clients.
pub fn group_text(event_type: EventType, count: usize) -> String {
    match event_type {
        EventType::ComplianceExposure => {
            format!("Risk mandate drift detected for {count} clients")
        }
        EventType::TaxOpportunity => format!("Tax optimization windows open for {count} clients"),
        EventType::VulnerabilityAlert => {
            format!("Consumer Duty: {count} clients flagged for vulnerability assessment")
        }
        EventType::MarketRisk => {
            format!("Market volatility thresholds breached for {count} clients")
        }
        EventType::BehaviouralRisk => format!("Behavioural friction detected for {count} clients"),
        other => format!("Multiple {} events detected", title_case(&other.search_text())),
    }
}

/// The narrative headline when there is one, else the rule reason naming the client.
pub fn event_text(event: &RiskEvent, client_name: &str) -> String {
    if let Some(narrative) = &event.interpretation {
        if !narrative.headline.trim().is_empty() {
            return narrative.headline.clone();
        }
    }
    let reason = event.reason();
    if !client_name.is_empty() && !reason.contains(client_name) {
        format!("{client_name}: {reason}")
    } else {
        reason
    }
}

/// Consequence then nuance, skipping blanks.
pub fn summary_lines(narrative: Option<&Narrative>) -> Vec<String> {
    let Some(n) = narrative else {
        return Vec::new();
    };
    [&n.consequence_if_ignored, &n.behavioural_nuance]
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Volatility {
    pub value: String,
    pub label: &'static str,
}

pub fn volatility(event: &RiskEvent) -> Option<Volatility> {
    match &event.classification {
        Classification::Sensitivity { performance, .. } => Some(Volatility {
            value: signed_pct(*performance),
            label: if performance.abs() > BREACH_THRESHOLD {
                "Live Breach Detected"
            } else {
                "Approaching Threshold"
            },
        }),
        Classification::MarketInterrupt { index_delta, .. } => Some(Volatility {
            value: signed_pct(*index_delta),
            label: "Significant Movement",
        }),
        Classification::BehaviouralFriction {
            trigger_performance,
            ..
        } => Some(Volatility {
            value: signed_pct(*trigger_performance),
            label: "Emotional Trigger Zone",
        }),
        _ => None,
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Finding, Urgency};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn event(classification: Classification, urgency: Urgency) -> RiskEvent {
        let finding = Finding::for_client(Uuid::new_v4(), urgency, classification);
        RiskEvent::from_finding(Uuid::new_v4(), &finding, Utc::now())
    }

    #[test]
    fn chips_carry_urgency_and_sector_move() {
        let e = event(
            Classification::Sensitivity {
                sector: "Energy".to_string(),
                exposure: 0.3,
                performance: -0.065,
                risk_score: 3.0,
            },
            Urgency::Critical,
        );
        assert_eq!(chips(&e), vec!["Market Risk", "Urgency: Critical", "Energy -6.5%"]);
    }

    #[test]
    fn event_text_prefixes_client_when_no_headline() {
        let e = event(
            Classification::CgtExposure {
                unrealized_gains: 2_800.0,
            },
            Urgency::Medium,
        );
        assert!(event_text(&e, "Ada Lovelace").starts_with("Ada Lovelace: UK CGT Warning"));
    }

    #[test]
    fn volatility_labels_follow_breach_threshold() {
        let near = event(
            Classification::Sensitivity {
                sector: "Tech".to_string(),
                exposure: 0.3,
                performance: -0.03,
                risk_score: 3.0,
            },
            Urgency::High,
        );
        assert_eq!(volatility(&near).unwrap().label, "Approaching Threshold");
        let concentration = event(
            Classification::Concentration {
                sector: "Tech".to_string(),
                exposure: 0.5,
            },
            Urgency::High,
        );
        assert!(volatility(&concentration).is_none());
    }

    #[test]
    fn templates_and_time_format() {
        assert_eq!(
            group_text(EventType::MarketInterrupt, 2),
            "Multiple Market Interrupt events detected"
        );
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 14, 5, 0).unwrap();
        assert_eq!(display_time(at), "2:05 PM");
    }
}
