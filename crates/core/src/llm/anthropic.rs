use crate::config::Settings;
use crate::domain::event::Narrative;
use crate::domain::records::{BriefPayload, DraftContent};
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{
    BriefContext, DraftRequest, InterpretRequest, MasterNarrative, NarrativeClient, Provider,
    RosterEntry,
};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const TOOL_EMIT_NARRATIVE: &str = "emit_narrative";
const TOOL_EMIT_BOOK_SUMMARY: &str = "emit_book_summary";
const TOOL_EMIT_DRAFT: &str = "emit_draft";
const TOOL_EMIT_BRIEF: &str = "emit_meeting_brief";

const ROSTER_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

/// One structured-output call: the model is forced to answer through `tool`.
struct ToolCall<'a> {
    tool: Tool,
    system: &'a str,
    user: String,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn request(&self, call: &ToolCall<'_>, content: String) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(call.system.to_string()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(vec![call.tool.clone()]),
            tool_choice: Some(ToolChoice::Tool {
                name: call.tool.name,
            }),
        }
    }

    /// Runs one tool-forced call. Falls back to parsing free text, with a single repair
    /// round when the text is not valid JSON.
    async fn structured<T: DeserializeOwned>(&self, call: ToolCall<'_>) -> anyhow::Result<T> {
        let (_raw_json, res) = self
            .create_message(self.request(&call, call.user.clone()))
            .await?;

        if let Some(parsed) = response_tool_input::<T>(&res, call.tool.name)? {
            return Ok(parsed);
        }

        let text = response_text(&res);
        let first_err = match json::parse_reply::<T>(&text, call.tool.name) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => err,
        };
        tracing::warn!(
            tool = call.tool.name,
            error = %first_err,
            "LLM reply was not structured; attempting one repair"
        );

        let (repair_raw_json, repair_res) = self
            .create_message(self.request(&call, repair_prompt(&call.user, &text)))
            .await?;
        if let Some(parsed) = response_tool_input::<T>(&repair_res, call.tool.name)? {
            return Ok(parsed);
        }
        let repair_text = response_text(&repair_res);
        json::parse_reply::<T>(&repair_text, call.tool.name).map_err(|err| {
            LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "parse_after_repair",
                detail: format!("first_error={first_err}; final_error={err}"),
                raw_output: Some(repair_text),
                raw_response_json: Some(repair_raw_json),
            }
            .into()
        })
    }
}

fn repair_prompt(original: &str, previous_output: &str) -> String {
    format!(
        "Your previous message was NOT valid JSON.\n\n\
TASK: Answer the request below with ONLY a single JSON object matching the tool schema.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- Use double quotes for all JSON strings.\n\n\
REQUEST:\n{original}\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
    )
}

fn response_text(res: &CreateMessageResponse) -> String {
    let mut out = String::new();
    for block in &res.content {
        if let ContentBlock::Text { text } = block {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

fn response_tool_input<T: DeserializeOwned>(
    res: &CreateMessageResponse,
    tool: &str,
) -> anyhow::Result<Option<T>> {
    for block in &res.content {
        if let ContentBlock::ToolUse { name, input, .. } = block {
            if name == tool {
                let parsed = serde_json::from_value::<T>(input.clone())
                    .with_context(|| format!("failed to decode tool_use.input for {tool}"))?;
                return Ok(Some(parsed));
            }
        }
    }
    Ok(None)
}

const ADVISER_SYSTEM: &str = "You are Atlas, a senior UK wealth-management adviser's analyst. \
Be concise, specific and opinionated. Never invent figures that are not in the input.";

fn narrative_tool() -> Tool {
    Tool {
        name: TOOL_EMIT_NARRATIVE,
        description: "Emit the adviser-facing narrative for one detected finding",
        input_schema: serde_json::json!({
            "type": "object",
            "required": ["headline", "consequence_if_ignored", "behavioural_nuance", "suggested_action"],
            "properties": {
                "headline": {"type": "string"},
                "consequence_if_ignored": {"type": "string"},
                "behavioural_nuance": {"type": "string"},
                "suggested_action": {"type": "string", "enum": ["draft_email", "dismiss"]}
            }
        }),
    }
}

fn book_summary_tool() -> Tool {
    let list = serde_json::json!({"type": "array", "items": {"type": "string"}});
    Tool {
        name: TOOL_EMIT_BOOK_SUMMARY,
        description: "Emit the morning summary of the UK market and the adviser's client book",
        input_schema: serde_json::json!({
            "type": "object",
            "required": ["title", "bullets", "market_summary", "critical_news"],
            "properties": {
                "title": {"type": "string"},
                "bullets": list,
                "market_summary": {"type": "string"},
                "critical_news": list,
                "top_risks": list,
                "suggested_actions": list
            }
        }),
    }
}

fn draft_tool() -> Tool {
    Tool {
        name: TOOL_EMIT_DRAFT,
        description: "Emit a client email draft",
        input_schema: serde_json::json!({
            "type": "object",
            "required": ["subject", "body"],
            "properties": {
                "subject": {"type": "string"},
                "body": {"type": "string"}
            }
        }),
    }
}

fn brief_tool() -> Tool {
    let list = serde_json::json!({"type": "array", "items": {"type": "string"}});
    Tool {
        name: TOOL_EMIT_BRIEF,
        description: "Emit a structured pre-meeting brief",
        input_schema: serde_json::json!({
            "type": "object",
            "required": ["client_summary", "priority_talking_point", "talking_points", "agenda", "compliance_reminders"],
            "properties": {
                "client_summary": {"type": "string"},
                "priority_talking_point": {"type": "string"},
                "talking_points": list,
                "agenda": list,
                "compliance_reminders": list,
                "tax_opportunities": list,
                "recent_life_events": list,
                "risk_alignment": {"type": "string"},
                "portfolio_performance": {"type": "string"}
            }
        }),
    }
}

#[async_trait::async_trait]
impl NarrativeClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn interpret_finding(&self, req: &InterpretRequest) -> anyhow::Result<Narrative> {
        let finding = serde_json::to_string(&req.classification)
            .context("failed to encode classification")?;
        let user = format!(
            "Generate a punchy, personalised headline for this detected risk and state the strategic consequence.\n\n\
Client: {}\nEvent type: {}\nUrgency: {}\nDeterministic finding: {}\nStructured finding: {finding}\n\
Client memory: {}\n{}",
            req.client_name.as_deref().unwrap_or("Whole book"),
            req.event_type,
            req.urgency,
            req.reason,
            req.memory_summary,
            req.market_summary,
        );
        let mut narrative: Narrative = self
            .structured(ToolCall {
                tool: narrative_tool(),
                system: ADVISER_SYSTEM,
                user,
            })
            .await?;
        narrative.error = None;
        Ok(narrative)
    }

    async fn summarize_book(
        &self,
        roster: &[RosterEntry],
        market_summary: &str,
    ) -> anyhow::Result<MasterNarrative> {
        let book = roster
            .iter()
            .take(ROSTER_LIMIT)
            .map(|c| format!("- {}: {}", c.name, c.vulnerability_category))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Provide a high-level morning summary of the UK market and the adviser's book.\n\n\
{market_summary}\nClient Book Overview ({} clients):\n{book}",
            roster.len()
        );
        self.structured(ToolCall {
            tool: book_summary_tool(),
            system: ADVISER_SYSTEM,
            user,
        })
        .await
    }

    async fn draft_communication(&self, req: &DraftRequest) -> anyhow::Result<DraftContent> {
        let user = format!(
            "Draft a proactive, opinionated email from the adviser to the client about this finding.\n\n\
Client: {}\nEvent type: {}\nUrgency: {}\nFinding: {}\nHeadline: {}",
            req.client_name.as_deref().unwrap_or("Valued client"),
            req.event_type,
            req.urgency,
            req.reason,
            req.headline.as_deref().unwrap_or("-"),
        );
        self.structured(ToolCall {
            tool: draft_tool(),
            system: ADVISER_SYSTEM,
            user,
        })
        .await
    }

    async fn generate_meeting_brief(
        &self,
        client_id: Uuid,
        ctx: &BriefContext,
    ) -> anyhow::Result<BriefPayload> {
        let context =
            serde_json::to_string_pretty(ctx).context("failed to encode meeting context")?;
        let user = format!(
            "Prepare a concise, professional meeting brief focused on priority strategic talking points.\n\n\
Client id: {client_id}\nContext:\n{context}"
        );
        let mut payload: BriefPayload = self
            .structured(ToolCall {
                tool: brief_tool(),
                system: ADVISER_SYSTEM,
                user,
            })
            .await?;
        payload.error = None;
        Ok(payload)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    #[allow(dead_code)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        #[allow(dead_code)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::SuggestedAction;
    use serde_json::json;

    #[test]
    fn decodes_tool_use_narrative() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "...", "signature": "sig"},
                {
                    "type": "tool_use",
                    "id": "toolu_1",
                    "name": TOOL_EMIT_NARRATIVE,
                    "input": {
                        "headline": "Energy slide hits Jane's largest position",
                        "consequence_if_ignored": "A further 5% fall costs about £9,000",
                        "behavioural_nuance": "Jane sold at the 2020 lows",
                        "suggested_action": "draft_email"
                    }
                }
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        let narrative = response_tool_input::<Narrative>(&res, TOOL_EMIT_NARRATIVE)
            .unwrap()
            .unwrap();
        assert_eq!(narrative.suggested_action, SuggestedAction::DraftEmail);
        assert!(narrative.error.is_none());
        assert!(response_tool_input::<Narrative>(&res, TOOL_EMIT_DRAFT)
            .unwrap()
            .is_none());
    }

    #[test]
    fn response_text_joins_text_blocks_only() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "{\"subject\":\"Hello\","},
                {"type": "redacted_thinking", "data": "xyz"},
                {"type": "text", "text": "\"body\":\"World\"}"}
            ]
        }))
        .unwrap();
        let text = response_text(&res);
        let draft: DraftContent = json::parse_reply(&text, "draft").unwrap();
        assert_eq!(draft.subject, "Hello");
        assert_eq!(draft.body, "World");
    }

    #[test]
    fn request_forces_the_tool() {
        let tool = draft_tool();
        let req = CreateMessageRequest {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 10,
            system: None,
            messages: vec![],
            tools: Some(vec![tool]),
            tool_choice: Some(ToolChoice::Tool {
                name: TOOL_EMIT_DRAFT,
            }),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["tool_choice"], json!({"type": "tool", "name": "emit_draft"}));
        assert!(value.get("system").is_none());
    }
}
