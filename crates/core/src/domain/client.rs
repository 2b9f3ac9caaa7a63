use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub tax_profile: TaxProfile,
    #[serde(default)]
    pub behavioural_profile: BehaviouralProfile,
    #[serde(default)]
    pub vulnerability: Vulnerability,
    pub last_proactive_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            "Unknown Client".to_string()
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxProfile {
    pub isa_allowance_remaining: f64,
    pub estimated_gross_income: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviouralProfile {
    /// 0-100.
    pub risk_aversion: f64,
    /// 0-100.
    pub drawdown_tolerance: f64,
    /// 0-10.
    pub panic_score: f64,
    pub sensitivity_sector: String,
    pub note: Option<String>,
}

impl Default for BehaviouralProfile {
    fn default() -> Self {
        Self {
            risk_aversion: 50.0,
            drawdown_tolerance: 50.0,
            panic_score: 0.0,
            sensitivity_sector: "Energy".to_string(),
            note: None,
        }
    }
}

/// Output of the vulnerability assessor, stored on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vulnerability {
    pub score: f64,
    pub category: String,
    pub notes: String,
}

impl Default for Vulnerability {
    fn default() -> Self {
        Self {
            score: 0.0,
            category: "None".to_string(),
            notes: "No indicators found".to_string(),
        }
    }
}

/// A remembered note about how a client behaves or what is happening in their life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviouralMemory {
    pub id: Uuid,
    pub client_id: Uuid,
    pub content: String,
    pub source_reference: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profiles_fill_missing_keys_with_defaults() {
        let profile: BehaviouralProfile = serde_json::from_value(json!({"panic_score": 7})).unwrap();
        assert_eq!(profile.panic_score, 7.0);
        assert_eq!(profile.sensitivity_sector, "Energy");
        assert_eq!(profile.risk_aversion, 50.0);

        let tax: TaxProfile = serde_json::from_value(json!({})).unwrap();
        assert_eq!(tax.isa_allowance_remaining, 0.0);
    }

    #[test]
    fn full_name_falls_back_when_blank() {
        let client = Client {
            id: Uuid::new_v4(),
            first_name: " ".to_string(),
            last_name: String::new(),
            email: "x@example.com".to_string(),
            tax_profile: TaxProfile::default(),
            behavioural_profile: BehaviouralProfile::default(),
            vulnerability: Vulnerability::default(),
            last_proactive_check: None,
            created_at: Utc::now(),
        };
        assert_eq!(client.full_name(), "Unknown Client");
    }
}
