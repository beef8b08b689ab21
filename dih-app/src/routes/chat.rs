use super::error_response;
use crate::server::AppState;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use dih_llm::{ChatMessage, CompletionResponse, GenerateOptions, LlmError, StreamHandler};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_API_MAX_TOKENS: u32 = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
}

impl ChatRequest {
    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            max_tokens: Some(self.max_tokens.unwrap_or(DEFAULT_API_MAX_TOKENS)),
            temperature: self.temperature,
            ..GenerateOptions::default()
        }
    }
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
}

#[tracing::instrument(level = "info", skip_all)]
async fn chat(Extension(state): Extension<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    if req.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Messages are required");
    }

    let options = req.options();
    match state.chat.generate(req.messages, options).await {
        Ok(response) => Json(serde_json::json!({
            "content": response.text,
            "finishReason": response.finish_reason,
            "usage": response.usage,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "chat completion failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Forwards session callbacks as SSE events. A closed receiver cancels the
/// stream.
struct SseForwarder {
    tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
}

impl SseForwarder {
    fn send(&self, name: &str, data: serde_json::Value) {
        let event = Event::default().event(name).data(data.to_string());
        if self.tx.send(event).is_err() {
            self.cancel.cancel();
        }
    }
}

impl StreamHandler for SseForwarder {
    fn on_text_update(&mut self, text: &str) {
        self.send("text", serde_json::json!({ "text": text }));
    }

    fn on_complete(&mut self, response: &CompletionResponse) {
        self.send(
            "complete",
            serde_json::json!({
                "content": response.text,
                "finishReason": response.finish_reason,
                "toolCalls": response.tool_calls,
                "usage": response.usage,
            }),
        );
    }

    fn on_error(&mut self, error: &LlmError) {
        self.send("error", serde_json::json!({ "error": error.to_string() }));
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn chat_stream(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    if req.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Messages are required");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = state.shutdown.child_token();
    let forwarder = SseForwarder {
        tx,
        cancel: cancel.clone(),
    };
    let options = req.options();
    let messages = req.messages;
    let worker_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = worker_state
            .chat
            .generate_stream_with_cancel(messages, options, forwarder, cancel)
            .await
        {
            tracing::warn!(error = %e, "chat stream ended with error");
        }
    });

    let events = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<Event, Infallible>(event), rx))
    });
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

#[cfg(test)]
mod tests {
    use crate::server::{AppState, app};
    use crate::testing::FakeClient;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn chat_returns_content_and_usage() {
        let (chat, client) = FakeClient::replying("Hello!").into_chat();
        let response = app(Arc::new(AppState::new(chat)))
            .oneshot(post_json(
                "/api/chat",
                serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value =
            serde_json::from_str(&body_string(response).await).expect("json");
        assert_eq!(json["content"], "Hello!");
        assert_eq!(json["finishReason"], "stop");
        assert_eq!(json["usage"]["total_tokens"], 12);

        let sent = client.last_request().expect("request");
        assert_eq!(sent.max_tokens, Some(500));
    }

    #[tokio::test]
    async fn chat_rejects_empty_messages() {
        let (chat, _) = FakeClient::replying("unused").into_chat();
        let response = app(Arc::new(AppState::new(chat)))
            .oneshot(post_json("/api/chat", serde_json::json!({ "messages": [] })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("Messages are required"));
    }

    #[tokio::test]
    async fn stream_emits_text_then_complete() {
        let (chat, _) = FakeClient::streaming(&["Hel", "lo"]).into_chat();
        let response = app(Arc::new(AppState::new(chat)))
            .oneshot(post_json(
                "/api/chat/stream",
                serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let body = body_string(response).await;
        let first = body.find("event: text").expect("text event");
        let cumulative = body.find(r#"{"text":"Hello"}"#).expect("cumulative text");
        let complete = body.find("event: complete").expect("complete event");
        assert!(first < cumulative && cumulative < complete, "{body}");
        assert!(!body.contains("event: error"));
    }

    #[tokio::test]
    async fn stream_reports_transport_errors() {
        let mut fake = FakeClient::streaming(&["partial"]);
        fake.chunks.pop();
        fake.stream_error = Some("upstream reset".to_string());
        let (chat, _) = fake.into_chat();

        let response = app(Arc::new(AppState::new(chat)))
            .oneshot(post_json(
                "/api/chat/stream",
                serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .expect("response");
        let body = body_string(response).await;
        assert!(body.contains("event: error"), "{body}");
        assert!(body.contains("upstream reset"));
        assert!(!body.contains("event: complete"));
    }
}
