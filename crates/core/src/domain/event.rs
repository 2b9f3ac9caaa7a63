use crate::domain::{gbp, signed_pct};
use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MarketRisk,
    TaxOpportunity,
    ComplianceExposure,
    BehaviouralRisk,
    MarketInterrupt,
    MorningIntelligence,
    VulnerabilityAlert,
    MeetingBrief,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::MarketRisk,
        EventType::TaxOpportunity,
        EventType::ComplianceExposure,
        EventType::BehaviouralRisk,
        EventType::MarketInterrupt,
        EventType::MorningIntelligence,
        EventType::VulnerabilityAlert,
        EventType::MeetingBrief,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::MarketRisk => "market_risk",
            EventType::TaxOpportunity => "tax_opportunity",
            EventType::ComplianceExposure => "compliance_exposure",
            EventType::BehaviouralRisk => "behavioural_risk",
            EventType::MarketInterrupt => "market_interrupt",
            EventType::MorningIntelligence => "morning_intelligence",
            EventType::VulnerabilityAlert => "vulnerability_alert",
            EventType::MeetingBrief => "meeting_brief",
        }
    }

    /// Book-wide types are singletons: at most one open event per type, no client subject.
    pub fn is_book_wide(self) -> bool {
        matches!(
            self,
            EventType::MarketInterrupt | EventType::MorningIntelligence
        )
    }

    /// Short label used for tabs.
    pub fn label(self) -> &'static str {
        match self {
            EventType::MarketRisk => "Market Risk",
            EventType::TaxOpportunity => "Tax Window",
            EventType::ComplianceExposure => "Compliance",
            EventType::BehaviouralRisk => "Behavioural",
            EventType::MarketInterrupt => "Market Alert",
            EventType::MorningIntelligence => "Morning Brief",
            EventType::VulnerabilityAlert => "Vulnerability",
            EventType::MeetingBrief => "Meeting Prep",
        }
    }

    /// `market_risk` -> `market risk`, used by free-text search.
    pub fn search_text(self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match EventType::ALL.iter().find(|t| t.as_str() == s) {
            Some(t) => Ok(*t),
            None => bail!("unknown event_type: {s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Urgency::Low => "Low",
            Urgency::Medium => "Medium",
            Urgency::High => "High",
            Urgency::Critical => "Critical",
        }
    }

    /// High or critical.
    pub fn is_elevated(self) -> bool {
        matches!(self, Urgency::High | Urgency::Critical)
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "low" => Urgency::Low,
            "medium" => Urgency::Medium,
            "high" => Urgency::High,
            "critical" => Urgency::Critical,
            other => bail!("unknown urgency: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Open,
    AutoResolved,
    AdviserResolved,
    Dismissed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Open => "open",
            EventStatus::AutoResolved => "auto_resolved",
            EventStatus::AdviserResolved => "adviser_resolved",
            EventStatus::Dismissed => "dismissed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != EventStatus::Open
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "open" => EventStatus::Open,
            "auto_resolved" => EventStatus::AutoResolved,
            "adviser_resolved" => EventStatus::AdviserResolved,
            "dismissed" => EventStatus::Dismissed,
            other => bail!("unknown event status: {other}"),
        })
    }
}

/// Rule-specific structured reason for a finding. One variant per rule outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Concentration {
        sector: String,
        exposure: f64,
    },
    Sensitivity {
        sector: String,
        exposure: f64,
        performance: f64,
        risk_score: f64,
    },
    IsaAllowance {
        isa_remaining: f64,
        cash_balance: f64,
    },
    CgtExposure {
        unrealized_gains: f64,
    },
    PensionTaper {
        income: f64,
        available_allowance: f64,
    },
    MandateDrift {
        drift: f64,
        threshold: f64,
        target: f64,
        current: f64,
    },
    BehaviouralFriction {
        panic_score: f64,
        trigger_sector: String,
        trigger_performance: f64,
    },
    Vulnerability {
        score: f64,
        category: String,
        notes: String,
    },
    MarketInterrupt {
        index_delta: f64,
        previous_value: f64,
        current_value: f64,
        #[serde(default)]
        headlines: Vec<String>,
        #[serde(default)]
        exposed_clients: Vec<String>,
    },
    MorningBrief {
        title: String,
        #[serde(default)]
        bullets: Vec<String>,
        #[serde(default)]
        market_summary: String,
        #[serde(default)]
        critical_news: Vec<String>,
        #[serde(default)]
        top_risks: Vec<String>,
        #[serde(default)]
        suggested_actions: Vec<String>,
    },
}

impl Classification {
    pub fn event_type(&self) -> EventType {
        match self {
            Classification::Concentration { .. } | Classification::Sensitivity { .. } => {
                EventType::MarketRisk
            }
            Classification::IsaAllowance { .. }
            | Classification::CgtExposure { .. }
            | Classification::PensionTaper { .. } => EventType::TaxOpportunity,
            Classification::MandateDrift { .. } => EventType::ComplianceExposure,
            Classification::BehaviouralFriction { .. } => EventType::BehaviouralRisk,
            Classification::Vulnerability { .. } => EventType::VulnerabilityAlert,
            Classification::MarketInterrupt { .. } => EventType::MarketInterrupt,
            Classification::MorningBrief { .. } => EventType::MorningIntelligence,
        }
    }

    /// Human-readable reason, derived mechanically from the structured fields.
    pub fn reason(&self) -> String {
        match self {
            Classification::Concentration { sector, exposure } => format!(
                "Strategic Concentration Risk: {sector} makes up {:.1}% of total portfolio.",
                exposure * 100.0
            ),
            Classification::Sensitivity {
                sector,
                exposure,
                performance,
                ..
            } => format!(
                "Sensitivity Alert: {sector} drop ({:.1}%) impacting high exposure ({:.1}%)",
                performance * 100.0,
                exposure * 100.0
            ),
            Classification::IsaAllowance {
                isa_remaining,
                cash_balance,
            } => format!(
                "Strategic Tax Opportunity: High cash ({}) with unused ISA ({}).",
                gbp(*cash_balance),
                gbp(*isa_remaining)
            ),
            Classification::CgtExposure { unrealized_gains } => format!(
                "UK CGT Warning: Unrealized gains ({}) approaching the annual exempt amount of £3,000.",
                gbp(*unrealized_gains)
            ),
            Classification::PensionTaper {
                income,
                available_allowance,
            } => format!(
                "Pension Tapering: High income ({}) reduced available allowance to {}.",
                gbp(*income),
                gbp(*available_allowance)
            ),
            Classification::MandateDrift {
                target, current, ..
            } => format!(
                "Mandate Drift: Client target is {target}, currently operating at {current:.1}"
            ),
            Classification::BehaviouralFriction {
                trigger_sector,
                trigger_performance,
                ..
            } => format!(
                "Behavioural Friction: Client has high sensitivity to {trigger_sector} which is currently down {:.1}%",
                trigger_performance * 100.0
            ),
            Classification::Vulnerability { score, notes, .. } => {
                format!("High Vulnerability Score ({score:.2}): {notes}")
            }
            Classification::MarketInterrupt {
                index_delta,
                previous_value,
                current_value,
                ..
            } => format!(
                "Abnormal FTSE 100 movement: {} ({previous_value:.2} -> {current_value:.2})",
                signed_pct(*index_delta)
            ),
            Classification::MorningBrief { title, .. } => title.clone(),
        }
    }

    /// The singleton book-wide morning summary.
    pub fn is_master_brief(&self) -> bool {
        matches!(self, Classification::MorningBrief { .. })
    }

    /// Book-wide finding presented inside the master brief's card list.
    pub fn is_macro_grouping(&self) -> bool {
        matches!(self, Classification::MarketInterrupt { .. })
    }

    /// Sector and its move, when the finding is about a specific sector's performance.
    pub fn sector_move(&self) -> Option<(&str, f64)> {
        match self {
            Classification::Sensitivity {
                sector,
                performance,
                ..
            } => Some((sector.as_str(), *performance)),
            Classification::BehaviouralFriction {
                trigger_sector,
                trigger_performance,
                ..
            } => Some((trigger_sector.as_str(), *trigger_performance)),
            _ => None,
        }
    }
}

/// Candidate detection produced by one rule, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub subject: Option<Uuid>,
    pub urgency: Urgency,
    pub classification: Classification,
}

impl Finding {
    pub fn for_client(client_id: Uuid, urgency: Urgency, classification: Classification) -> Self {
        Self {
            subject: Some(client_id),
            urgency,
            classification,
        }
    }

    pub fn book_wide(urgency: Urgency, classification: Classification) -> Self {
        Self {
            subject: None,
            urgency,
            classification,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.classification.event_type()
    }

    pub fn reason(&self) -> String {
        self.classification.reason()
    }

    pub fn subject_key(&self) -> String {
        subject_key(self.event_type(), self.subject)
    }
}

/// Dedup partition for open events: `book` for book-wide singletons, `client:<id>` otherwise.
pub fn subject_key(event_type: EventType, subject: Option<Uuid>) -> String {
    match subject {
        Some(id) if !event_type.is_book_wide() => format!("client:{id}"),
        _ => "book".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    DraftEmail,
    Dismiss,
}

/// Adviser-facing narrative produced by the text-generation collaborator (or its fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub headline: String,
    pub consequence_if_ignored: String,
    pub behavioural_nuance: String,
    pub suggested_action: SuggestedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Narrative {
    /// Deterministic stand-in used whenever enrichment fails.
    pub fn fallback(event_type: EventType, error: impl Into<String>) -> Self {
        Self {
            headline: format!("Risk detected: {}", event_type.as_str()),
            consequence_if_ignored: "Technical analysis required.".to_string(),
            behavioural_nuance: "No behavioural context available.".to_string(),
            suggested_action: SuggestedAction::Dismiss,
            error: Some(error.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// A persisted finding with lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub event_type: EventType,
    pub urgency: Urgency,
    pub classification: Classification,
    pub interpretation: Option<Narrative>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskEvent {
    pub fn from_finding(id: Uuid, finding: &Finding, created_at: DateTime<Utc>) -> Self {
        let event_type = finding.event_type();
        Self {
            id,
            client_id: if event_type.is_book_wide() {
                None
            } else {
                finding.subject
            },
            event_type,
            urgency: finding.urgency,
            classification: finding.classification.clone(),
            interpretation: None,
            status: EventStatus::Open,
            created_at,
            resolved_at: None,
        }
    }

    pub fn reason(&self) -> String {
        self.classification.reason()
    }

    pub fn subject_key(&self) -> String {
        subject_key(self.event_type, self.client_id)
    }

    pub fn is_open(&self) -> bool {
        self.status == EventStatus::Open
    }
}
