use crate::chunk::{RawChunk, map_anthropic_stop_reason};
use crate::client::{ChunkStream, ClientConfig, CompletionClient, Provider, rough_token_count};
use crate::error::{LlmError, Result};
use crate::sse::{decode_sse, transport_events};
use crate::types::{
    ChatMessage, CompletionRequest, CompletionResponse, Role, ToolCall, ToolChoice,
    ToolDefinition, UNKNOWN_FINISH_REASON, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, api_key: &str, config: &ClientConfig) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_MESSAGES_URL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let mut system = String::new();
        let mut messages = Vec::new();

        for m in &request.messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                }
                Role::Assistant => messages.push(to_anthropic_assistant_message(m)),
                Role::Tool => messages.push(to_anthropic_tool_result_message(m)),
                Role::User | Role::Function => messages.push(to_anthropic_user_message(m)),
            }
        }

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            system: Some(system).filter(|s| !s.is_empty()),
            messages,
            tools: request.tools.iter().map(to_anthropic_tool).collect(),
            tool_choice: request.tool_choice.as_ref().map(to_anthropic_tool_choice),
            stream: if stream { Some(true) } else { None },
        }
    }

    async fn post(&self, body: &AnthropicRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.request_body(request, false);
        let response = self.post(&body).await?;
        let text = response.text().await?;
        let parsed: AnthropicResponse = serde_json::from_str(&text)?;
        parsed.into_completion(&self.model)
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        let body = self.request_body(request, true);
        let response = self.post(&body).await?;
        let sse = decode_sse(response.bytes_stream());
        Ok(transport_events(sse, RawChunk::Anthropic))
    }

    fn count_tokens(&self, input: &str) -> usize {
        rough_token_count(input)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

fn to_anthropic_tool(t: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: t.name.clone(),
        description: t.description.clone(),
        input_schema: t.parameters.clone(),
    }
}

fn to_anthropic_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
        ToolChoice::None => serde_json::json!({ "type": "none" }),
        ToolChoice::Required => serde_json::json!({ "type": "any" }),
        ToolChoice::Function(name) => serde_json::json!({ "type": "tool", "name": name }),
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Unsupported,
}

fn to_anthropic_user_message(m: &ChatMessage) -> AnthropicMessage {
    AnthropicMessage {
        role: "user",
        content: vec![AnthropicContentBlock::Text {
            text: m.content.clone(),
        }],
    }
}

fn to_anthropic_tool_result_message(m: &ChatMessage) -> AnthropicMessage {
    AnthropicMessage {
        role: "user",
        content: vec![AnthropicContentBlock::ToolResult {
            tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
            content: m.content.clone(),
        }],
    }
}

fn to_anthropic_assistant_message(m: &ChatMessage) -> AnthropicMessage {
    let mut blocks = Vec::new();
    if !m.content.trim().is_empty() {
        blocks.push(AnthropicContentBlock::Text {
            text: m.content.clone(),
        });
    }
    for tc in &m.tool_calls {
        // Anthropic wants structured input; unparseable argument text degrades to `{}`.
        let input = tc
            .parse_arguments()
            .unwrap_or_else(|_| serde_json::json!({}));
        blocks.push(AnthropicContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            input,
        });
    }
    AnthropicMessage {
        role: "assistant",
        content: blocks,
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicResponse {
    fn into_completion(self, requested_model: &str) -> Result<CompletionResponse> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in self.content {
            match block {
                AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, serde_json::to_string(&input)?));
                }
                AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Unsupported => {}
            }
        }

        Ok(CompletionResponse {
            id: self.id,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            text,
            finish_reason: self
                .stop_reason
                .as_deref()
                .map(map_anthropic_stop_reason)
                .unwrap_or_else(|| UNKNOWN_FINISH_REASON.to_string()),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            usage: self
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnthropicClient {
        AnthropicClient::new(
            reqwest::Client::new(),
            "sk-ant-test",
            &ClientConfig::new("claude-3-haiku-20240307"),
        )
    }

    #[test]
    fn system_messages_are_hoisted() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("  Be brief. "),
            ChatMessage::user("hi"),
            ChatMessage::system("Be kind."),
        ]);
        let body = serde_json::to_value(client().request_body(&request, true)).expect("serialize");

        assert_eq!(body["system"], "Be brief.\nBe kind.");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn tool_turns_become_content_blocks() {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::user("weather?"),
                ChatMessage::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("toolu_1", "get_weather", "{\"loc\":\"NYC\"}")],
                ),
                ChatMessage::tool_result("toolu_1", "sunny"),
            ],
            tool_choice: Some(ToolChoice::Required),
            ..CompletionRequest::default()
        };
        let body = serde_json::to_value(client().request_body(&request, false)).expect("serialize");

        assert!(body.get("system").is_none());
        assert!(body.get("stream").is_none());
        let assistant = &body["messages"][1];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"][0]["type"], "tool_use");
        assert_eq!(assistant["content"][0]["input"]["loc"], "NYC");
        let result = &body["messages"][2];
        assert_eq!(result["role"], "user");
        assert_eq!(result["content"][0]["type"], "tool_result");
        assert_eq!(result["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(body["tool_choice"]["type"], "any");
    }

    #[test]
    fn response_maps_text_tools_and_stop_reason() {
        let raw = serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-haiku-20240307",
            "content": [
                { "type": "text", "text": "Checking." },
                { "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": { "loc": "NYC" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 20, "output_tokens": 8 }
        });
        let parsed: AnthropicResponse = serde_json::from_value(raw).expect("parse");
        let resp = parsed.into_completion("claude").expect("map");

        assert_eq!(resp.id, "msg_01");
        assert_eq!(resp.text, "Checking.");
        assert_eq!(resp.finish_reason, "tool_calls");
        assert_eq!(resp.tool_calls()[0].function.arguments, "{\"loc\":\"NYC\"}");
        assert_eq!(resp.usage, Some(Usage::new(20, 8)));
    }

    #[test]
    fn missing_stop_reason_is_unknown() {
        let parsed: AnthropicResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_02",
            "content": [{ "type": "thinking", "thinking": "..." }]
        }))
        .expect("parse");
        let resp = parsed.into_completion("claude").expect("map");
        assert_eq!(resp.finish_reason, UNKNOWN_FINISH_REASON);
        assert_eq!(resp.text, "");
        assert!(resp.tool_calls.is_none());
    }
}
