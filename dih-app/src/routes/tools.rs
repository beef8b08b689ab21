use super::error_response;
use crate::server::AppState;
use crate::tools::{TOOLS_SYSTEM_PROMPT, demo_tools};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use dih_llm::{ChatMessage, GenerateOptions, ToolDefinition};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ProcessQueryRequest {
    #[serde(default)]
    query: String,
    /// Defaults to the built-in demo tools.
    #[serde(default)]
    tools: Option<Vec<ToolSpec>>,
}

/// Tools arrive either OpenAI-shaped (`{"type":"function","function":{..}}`)
/// or as a bare definition.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolSpec {
    Function { function: ToolDefinition },
    Bare(ToolDefinition),
}

impl From<ToolSpec> for ToolDefinition {
    fn from(spec: ToolSpec) -> Self {
        match spec {
            ToolSpec::Function { function } => function,
            ToolSpec::Bare(definition) => definition,
        }
    }
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/process-query", post(process_query))
}

/// Returns the model's tool calls for the caller to execute, or plain content.
#[tracing::instrument(level = "info", skip_all)]
async fn process_query(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ProcessQueryRequest>,
) -> Response {
    if req.query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Query is required");
    }

    let messages = vec![
        ChatMessage::system(TOOLS_SYSTEM_PROMPT),
        ChatMessage::user(req.query),
    ];
    let options = GenerateOptions {
        tools: req
            .tools
            .map(|tools| tools.into_iter().map(ToolDefinition::from).collect())
            .unwrap_or_else(demo_tools),
        ..GenerateOptions::default()
    };

    match state.chat.generate(messages, options).await {
        Ok(response) if response.has_tool_calls() => {
            Json(serde_json::json!({ "toolCalls": response.tool_calls() })).into_response()
        }
        Ok(response) => Json(serde_json::json!({ "content": response.text })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "process-query completion failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
