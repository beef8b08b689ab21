use crate::chunk::RawChunk;
use crate::client::{ChunkStream, ClientConfig, CompletionClient, Provider, rough_token_count};
use crate::error::{LlmError, Result};
use crate::sse::{decode_sse, transport_events};
use crate::types::{
    ChatMessage, CompletionRequest, CompletionResponse, ToolCall, ToolChoice, ToolDefinition,
    UNKNOWN_FINISH_REASON, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_key: &str, config: &ClientConfig) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_CHAT_COMPLETIONS_URL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> OpenAiChatRequest {
        OpenAiChatRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(to_openai_message).collect(),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            tools: request.tools.iter().map(to_openai_tool).collect(),
            tool_choice: request.tool_choice.as_ref().map(to_openai_tool_choice),
            stream,
        }
    }

    async fn post(&self, body: &OpenAiChatRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
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
impl CompletionClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.request_body(request, false);
        let response = self.post(&body).await?;
        let text = response.text().await?;
        let parsed: OpenAiChatResponse = serde_json::from_str(&text)?;
        parsed.into_completion(&self.model)
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        let body = self.request_body(request, true);
        let response = self.post(&body).await?;
        let sse = decode_sse(response.bytes_stream());
        Ok(transport_events(sse, RawChunk::OpenAi))
    }

    fn count_tokens(&self, input: &str) -> usize {
        rough_token_count(input)
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_openai_tool(t: &ToolDefinition) -> OpenAiTool {
    OpenAiTool {
        r#type: "function".to_string(),
        function: OpenAiToolFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

fn to_openai_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => serde_json::json!("auto"),
        ToolChoice::None => serde_json::json!("none"),
        ToolChoice::Required => serde_json::json!("required"),
        ToolChoice::Function(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    OpenAiMessage {
        role: m.role.as_str(),
        // Assistant turns that only call tools carry no content field.
        content: if m.content.is_empty() && !m.tool_calls.is_empty() {
            None
        } else {
            Some(m.content.clone())
        },
        name: m.name.clone(),
        tool_calls: m.tool_calls.clone(),
        tool_call_id: m.tool_call_id.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiChatResponse {
    fn into_completion(self, requested_model: &str) -> Result<CompletionResponse> {
        let choice = self.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("openai response missing choices".to_string())
        })?;

        let tool_calls = choice.message.tool_calls;
        Ok(CompletionResponse {
            id: self.id,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| UNKNOWN_FINISH_REASON.to_string()),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            usage: self
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
        })
    }
}
