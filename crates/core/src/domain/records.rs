use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Approved,
    Rejected,
}

impl DraftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftStatus::Pending => "pending",
            DraftStatus::Approved => "approved",
            DraftStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for DraftStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => DraftStatus::Pending,
            "approved" => DraftStatus::Approved,
            "rejected" => DraftStatus::Rejected,
            other => bail!("unknown draft status: {other}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftContent {
    pub subject: String,
    pub body: String,
}

/// Proposed client communication tied to one risk event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftAction {
    pub id: Uuid,
    pub risk_event_id: Uuid,
    pub client_id: Option<Uuid>,
    pub action_type: String,
    pub content: DraftContent,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
}

impl DraftAction {
    pub fn is_pending(&self) -> bool {
        self.status == DraftStatus::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefPayload {
    pub client_summary: String,
    pub priority_talking_point: String,
    pub talking_points: Vec<String>,
    pub agenda: Vec<String>,
    pub compliance_reminders: Vec<String>,
    pub tax_opportunities: Vec<String>,
    pub recent_life_events: Vec<String>,
    pub risk_alignment: String,
    pub portfolio_performance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingBrief {
    pub id: Uuid,
    pub client_id: Uuid,
    pub meeting_at: DateTime<Utc>,
    pub payload: BriefPayload,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweepKind {
    #[serde(rename = "pulse_sweep")]
    Pulse,
    #[serde(rename = "book_sweep")]
    Book,
    #[serde(rename = "macro_sweep")]
    Macro,
    #[serde(rename = "meeting_prep_sweep")]
    MeetingPrep,
}

impl SweepKind {
    pub const ALL: [SweepKind; 4] = [
        SweepKind::Pulse,
        SweepKind::Book,
        SweepKind::Macro,
        SweepKind::MeetingPrep,
    ];

    /// Stored value of `heartbeat_logs.sweep_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            SweepKind::Pulse => "pulse_sweep",
            SweepKind::Book => "book_sweep",
            SweepKind::Macro => "macro_sweep",
            SweepKind::MeetingPrep => "meeting_prep_sweep",
        }
    }

    /// CLI / route name.
    pub fn slug(self) -> &'static str {
        match self {
            SweepKind::Pulse => "pulse",
            SweepKind::Book => "book",
            SweepKind::Macro => "macro",
            SweepKind::MeetingPrep => "meeting-prep",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SweepKind::Pulse => "Pulse Sweep",
            SweepKind::Book => "Book Sweep",
            SweepKind::Macro => "Macro Sweep",
            SweepKind::MeetingPrep => "Meeting Prep Sweep",
        }
    }
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for SweepKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match SweepKind::ALL
            .iter()
            .find(|k| k.slug() == normalized || k.as_str().replace('_', "-") == normalized)
        {
            Some(k) => Ok(*k),
            None => bail!("unknown sweep: {s}"),
        }
    }
}

/// Append-only audit record of one sweep execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatLog {
    pub id: Uuid,
    pub sweep_type: SweepKind,
    pub portfolios_scanned: u32,
    pub findings_found: u32,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHeartbeat {
    pub sweep_type: SweepKind,
    pub portfolios_scanned: u32,
    pub findings_found: u32,
    pub summary: String,
}
