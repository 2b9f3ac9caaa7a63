//! Expanded detail ("drawer") for a stream card.

use crate::domain::client::{BehaviouralMemory, Client};
use crate::domain::event::{Classification, EventType, RiskEvent};
use crate::domain::portfolio::Portfolio;
use crate::domain::records::{DraftAction, MeetingBrief};
use crate::stream::text::{self, Volatility};
use serde::Serialize;

const TOP_SECTORS: usize = 5;
const MEMORY_NOTES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorSlice {
    pub label: String,
    /// Percent of portfolio value, one decimal.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviourSnapshot {
    pub risk_aversion: f64,
    pub drawdown_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryNote {
    pub date: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetingContext {
    pub portfolio_performance: String,
    pub priority_topic: String,
    pub risk_alignment: String,
    pub talking_points: Vec<String>,
    pub agenda: Vec<String>,
    pub taxes: Vec<String>,
    pub compliance: Vec<String>,
    pub life_events: Vec<String>,
}

/// Type-specific drawer content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detail {
    MarketInterrupt {
        market_context: String,
        headlines: Vec<String>,
        exposed_clients: Vec<String>,
    },
    MorningBrief {
        summary: String,
        bullets: Vec<String>,
        suggestions: Vec<String>,
        risks: Vec<String>,
        news: Vec<String>,
    },
    Draft {
        subject: String,
        body: String,
    },
    Meeting(MeetingContext),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drawer {
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub portfolio: Vec<SectorSlice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<BehaviourSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behaviour_note: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memory: Vec<MemoryNote>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility: Option<Volatility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Detail>,
}

impl Drawer {
    fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            portfolio: Vec::new(),
            behaviour: None,
            behaviour_note: None,
            memory: Vec::new(),
            trace: Vec::new(),
            volatility: None,
            detail: None,
        }
    }
}

/// Client-side inputs for a drawer. Book-wide events have none.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientFacts<'a> {
    pub client: Option<&'a Client>,
    pub portfolio: Option<&'a Portfolio>,
    pub memory: &'a [BehaviouralMemory],
}

pub fn for_event(event: &RiskEvent, facts: ClientFacts<'_>) -> Drawer {
    let mut drawer = Drawer::titled(text::drawer_title(event.event_type));
    let narrative = event.interpretation.as_ref();
    let client_scoped = event.client_id.is_some() && !event.classification.is_macro_grouping();

    drawer.portfolio = facts.portfolio.map(sector_slices).unwrap_or_default();
    drawer.memory = memory_notes(facts.memory);
    if client_scoped {
        if let Some(client) = facts.client {
            let profile = &client.behavioural_profile;
            drawer.behaviour = Some(BehaviourSnapshot {
                risk_aversion: profile.risk_aversion,
                drawdown_tolerance: profile.drawdown_tolerance,
            });
            drawer.behaviour_note = narrative
                .map(|n| n.behavioural_nuance.clone())
                .filter(|s| !s.trim().is_empty())
                .or_else(|| profile.note.clone());
        }
    }

    drawer.trace.push(event.reason());
    if let Some(n) = narrative {
        if !n.consequence_if_ignored.trim().is_empty() {
            drawer.trace.push(format!("Consequence: {}", n.consequence_if_ignored));
        }
        if !n.behavioural_nuance.trim().is_empty() {
            drawer.trace.push(format!("Nuance: {}", n.behavioural_nuance));
        }
    }
    drawer.trace.push(format!("Urgency: {}", event.urgency));
    drawer.volatility = text::volatility(event);

    match &event.classification {
        Classification::BehaviouralFriction { panic_score, .. } => {
            drawer.trace.push(format!("Panic Score: {panic_score}/10"));
        }
        Classification::MarketInterrupt {
            headlines,
            exposed_clients,
            ..
        } => {
            drawer.detail = Some(Detail::MarketInterrupt {
                market_context: event.reason(),
                headlines: headlines.clone(),
                exposed_clients: exposed_clients.clone(),
            });
        }
        Classification::MorningBrief {
            bullets,
            market_summary,
            critical_news,
            top_risks,
            suggested_actions,
            ..
        } => {
            drawer.detail = Some(Detail::MorningBrief {
                summary: market_summary.clone(),
                bullets: bullets.clone(),
                suggestions: suggested_actions.clone(),
                risks: top_risks.clone(),
                news: critical_news.clone(),
            });
        }
        _ => {}
    }
    drawer
}

pub fn for_draft(draft: &DraftAction) -> Drawer {
    let mut drawer = Drawer::titled("Draft Communication");
    drawer.detail = Some(Detail::Draft {
        subject: draft.content.subject.clone(),
        body: draft.content.body.clone(),
    });
    drawer
}

pub fn for_meeting(brief: &MeetingBrief, facts: ClientFacts<'_>) -> Drawer {
    let mut drawer = Drawer::titled(text::drawer_title(EventType::MeetingBrief));
    let payload = &brief.payload;

    drawer.portfolio = facts.portfolio.map(sector_slices).unwrap_or_default();
    drawer.memory = memory_notes(facts.memory);
    drawer.behaviour = facts.client.map(|c| BehaviourSnapshot {
        risk_aversion: c.behavioural_profile.risk_aversion,
        drawdown_tolerance: c.behavioural_profile.drawdown_tolerance,
    });
    if !payload.client_summary.trim().is_empty() {
        drawer.behaviour_note = Some(payload.client_summary.clone());
    }
    drawer.trace = vec![
        format!("Meeting scheduled: {} today", text::display_time(brief.meeting_at)),
        "Client brief auto-generated".to_string(),
    ];
    if let Some(err) = &payload.error {
        drawer.trace.push(format!("Fallback brief: {err}"));
    }
    drawer.detail = Some(Detail::Meeting(MeetingContext {
        portfolio_performance: payload.portfolio_performance.clone(),
        priority_topic: payload.priority_talking_point.clone(),
        risk_alignment: payload.risk_alignment.clone(),
        talking_points: payload.talking_points.clone(),
        agenda: payload.agenda.clone(),
        taxes: payload.tax_opportunities.clone(),
        compliance: payload.compliance_reminders.clone(),
        life_events: payload.recent_life_events.clone(),
    }));
    drawer
}

fn sector_slices(portfolio: &Portfolio) -> Vec<SectorSlice> {
    portfolio
        .sector_exposures()
        .into_iter()
        .take(TOP_SECTORS)
        .map(|(label, exposure)| SectorSlice {
            label,
            value: (exposure * 1000.0).round() / 10.0,
        })
        .collect()
}

fn memory_notes(memory: &[BehaviouralMemory]) -> Vec<MemoryNote> {
    memory
        .iter()
        .take(MEMORY_NOTES)
        .map(|m| MemoryNote {
            date: m.created_at.format("%d %b %Y").to_string(),
            text: m.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Finding, Narrative, SuggestedAction, Urgency};
    use crate::testing::{client_named, portfolio_with};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn client_event_drawer_has_portfolio_behaviour_and_trace() {
        let client = client_named("Ada", "Lovelace");
        let portfolio = portfolio_with(
            &client,
            &[("Energy", 0.2), ("Tech", 0.4), ("Energy", 0.1), ("Health", 0.05)],
            25_000.0,
        );
        let finding = Finding::for_client(
            client.id,
            Urgency::High,
            Classification::BehaviouralFriction {
                panic_score: 8.0,
                trigger_sector: "Energy".to_string(),
                trigger_performance: -0.045,
            },
        );
        let mut event = RiskEvent::from_finding(Uuid::new_v4(), &finding, Utc::now());
        event.interpretation = Some(Narrative {
            headline: "Ada may sell into the dip".to_string(),
            consequence_if_ignored: "Crystallised losses".to_string(),
            behavioural_nuance: "Sold in 2020".to_string(),
            suggested_action: SuggestedAction::DraftEmail,
            error: None,
        });
        let memory: Vec<BehaviouralMemory> = (0..5)
            .map(|i| BehaviouralMemory {
                id: Uuid::new_v4(),
                client_id: client.id,
                content: format!("note {i}"),
                source_reference: "call".to_string(),
                created_at: Utc::now(),
            })
            .collect();

        let drawer = for_event(
            &event,
            ClientFacts {
                client: Some(&client),
                portfolio: Some(&portfolio),
                memory: &memory,
            },
        );
        assert_eq!(drawer.title, "Behavioural Risk Intelligence");
        assert_eq!(drawer.portfolio[0].label, "Tech");
        assert_eq!(drawer.portfolio[1].label, "Energy");
        assert_eq!(drawer.portfolio[1].value, 30.0);
        assert_eq!(drawer.memory.len(), 3);
        assert_eq!(drawer.behaviour_note.as_deref(), Some("Sold in 2020"));
        assert_eq!(
            drawer.trace,
            vec![
                event.reason(),
                "Consequence: Crystallised losses".to_string(),
                "Nuance: Sold in 2020".to_string(),
                "Urgency: high".to_string(),
                "Panic Score: 8/10".to_string(),
            ]
        );
        assert_eq!(drawer.volatility.unwrap().label, "Emotional Trigger Zone");
    }

    #[test]
    fn interrupt_drawer_lists_exposed_clients_without_behaviour() {
        let finding = Finding::book_wide(
            Urgency::Critical,
            Classification::MarketInterrupt {
                index_delta: -0.06,
                previous_value: 8000.0,
                current_value: 7520.0,
                headlines: vec!["Oil slumps".to_string()],
                exposed_clients: vec!["Ada Lovelace".to_string()],
            },
        );
        let event = RiskEvent::from_finding(Uuid::new_v4(), &finding, Utc::now());
        let drawer = for_event(&event, ClientFacts::default());
        assert!(drawer.behaviour.is_none());
        match drawer.detail {
            Some(Detail::MarketInterrupt {
                exposed_clients, ..
            }) => assert_eq!(exposed_clients, vec!["Ada Lovelace".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        let json = serde_json::to_value(for_event(&event, ClientFacts::default())).unwrap();
        assert_eq!(json["detail"]["kind"], "market_interrupt");
        assert_eq!(json["volatility"]["value"], "-6.0%");
    }
}
