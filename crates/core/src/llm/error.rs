use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// Carries the raw collaborator output alongside the failure so it can be logged.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={:?}, stage={}): {}",
            self.provider, self.stage, self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}

/// Short label for the stage that failed, if the error came from the collaborator.
pub fn failed_stage(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<LlmDiagnosticsError>().map(|e| e.stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_survives_anyhow_wrapping() {
        let err: anyhow::Error = LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "http",
            detail: "status=529".to_string(),
            raw_output: None,
            raw_response_json: None,
        }
        .into();
        assert_eq!(failed_stage(&err), Some("http"));
        assert_eq!(failed_stage(&anyhow::anyhow!("plain")), None);
        assert!(err.to_string().contains("stage=http"));
    }
}
