use crate::client::CompletionClient;
use crate::error::{LlmError, Result};
use crate::session::{StreamHandler, StreamSession};
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, ToolChoice, ToolDefinition};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-call overrides; unset fields fall back to the client's configuration.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
}

impl GenerateOptions {
    fn into_request(self, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools: self.tools,
            tool_choice: self.tool_choice,
        }
    }
}

/// Chat completion facade over a swappable client.
#[derive(Clone)]
pub struct ChatCompletion {
    client: Arc<dyn CompletionClient>,
}

impl ChatCompletion {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.client
    }

    pub fn set_client(&mut self, client: Arc<dyn CompletionClient>) {
        tracing::info!(
            provider = %client.provider(),
            model = client.model_name(),
            "completion client changed"
        );
        self.client = client;
    }

    pub async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<CompletionResponse> {
        let request = options.into_request(messages);
        self.client.complete(&request).await
    }

    pub async fn generate_stream<H: StreamHandler>(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
        handler: H,
    ) -> Result<CompletionResponse> {
        self.generate_stream_with_cancel(messages, options, handler, CancellationToken::new())
            .await
    }

    /// Streams into `handler`; exactly one of `on_complete` / `on_error` fires,
    /// including when the request is rejected before any chunk arrives.
    pub async fn generate_stream_with_cancel<H: StreamHandler>(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<CompletionResponse> {
        let request = options.into_request(messages);
        let mut session = StreamSession::with_handler(self.client.model_name(), handler);
        // Cancellation also covers connecting and waiting for response headers.
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                session.cancel();
                return Err(LlmError::Cancelled);
            }
            opened = self.client.stream(&request) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                session.fail(&e);
                return Err(e);
            }
        };
        session.run(stream, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{RawChunk, TransportEvent};
    use crate::client::{ChunkStream, Provider};
    use crate::session::StreamCallbacks;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedClient {
        model: String,
        chunks: Vec<&'static str>,
        reject_stream: bool,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        fn new(model: &str, chunks: Vec<&'static str>) -> Self {
            Self {
                model: model.to_string(),
                chunks,
                reject_stream: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn provider(&self) -> Provider {
            Provider::OpenAi
        }

        fn model_name(&self) -> &str {
            &self.model
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
            self.seen.lock().expect("lock").push(request.clone());
            Ok(CompletionResponse {
                id: "resp-1".to_string(),
                model: self.model.clone(),
                text: format!("echo: {}", request.messages.len()),
                finish_reason: "stop".to_string(),
                tool_calls: None,
                usage: None,
            })
        }

        async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
            self.seen.lock().expect("lock").push(request.clone());
            if self.reject_stream {
                return Err(LlmError::Api {
                    status: 401,
                    body: "invalid key".to_string(),
                });
            }
            let mut events: Vec<Result<TransportEvent>> = self
                .chunks
                .iter()
                .map(|c| Ok(TransportEvent::Chunk(RawChunk::OpenAi(c.to_string()))))
                .collect();
            events.push(Ok(TransportEvent::Done));
            Ok(Box::pin(futures_util::stream::iter(events)))
        }
    }

    #[tokio::test]
    async fn generate_passes_options_through() {
        let client = Arc::new(ScriptedClient::new("gpt-4o-mini", Vec::new()));
        let chat = ChatCompletion::new(client.clone());
        let options = GenerateOptions {
            temperature: Some(0.1),
            max_tokens: Some(42),
            ..GenerateOptions::default()
        };
        let resp = chat
            .generate(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")], options)
            .await
            .expect("completion");

        assert_eq!(resp.text, "echo: 2");
        let seen = client.seen.lock().expect("lock");
        assert_eq!(seen[0].temperature, Some(0.1));
        assert_eq!(seen[0].max_tokens, Some(42));
    }

    #[tokio::test]
    async fn generate_stream_reassembles_and_calls_back() {
        let client = Arc::new(ScriptedClient::new(
            "gpt-4o-mini",
            vec![
                r#"{"id":"c","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
                r#"{"id":"c","choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
                r#"{"id":"c","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            ],
        ));
        let chat = ChatCompletion::new(client);

        let updates = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Mutex::new(None));
        let (u, d) = (Arc::clone(&updates), Arc::clone(&done));
        let handler = StreamCallbacks::new()
            .on_text_update(move |t| u.lock().expect("lock").push(t.to_string()))
            .on_complete(move |r| *d.lock().expect("lock") = Some(r.text.clone()));

        let resp = chat
            .generate_stream(vec![ChatMessage::user("hi")], GenerateOptions::default(), handler)
            .await
            .expect("stream");

        assert_eq!(resp.text, "Hello");
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(*updates.lock().expect("lock"), vec!["Hel", "Hello"]);
        assert_eq!(done.lock().expect("lock").as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn rejected_stream_reports_error_to_handler() {
        let mut scripted = ScriptedClient::new("gpt-4o-mini", Vec::new());
        scripted.reject_stream = true;
        let chat = ChatCompletion::new(Arc::new(scripted));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&errors);
        let handler = StreamCallbacks::new()
            .on_error(move |err| e.lock().expect("lock").push(err.to_string()))
            .on_complete(|_| panic!("must not complete"));

        let err = chat
            .generate_stream(vec![ChatMessage::user("hi")], GenerateOptions::default(), handler)
            .await
            .expect_err("rejected");
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
        assert_eq!(errors.lock().expect("lock").len(), 1);
    }

    /// Never gets past the request: `stream` waits far longer than any test.
    struct StalledClient;

    #[async_trait]
    impl CompletionClient for StalledClient {
        fn provider(&self) -> Provider {
            Provider::OpenAi
        }

        fn model_name(&self) -> &str {
            "stalled"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
            Err(LlmError::Http("unused".to_string()))
        }

        async fn stream(&self, _request: &CompletionRequest) -> Result<ChunkStream> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Err(LlmError::Http("timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn cancel_aborts_a_request_still_waiting_for_headers() {
        let chat = ChatCompletion::new(Arc::new(StalledClient));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&errors);
        let handler = StreamCallbacks::new()
            .on_error(move |err| e.lock().expect("lock").push(err.to_string()))
            .on_complete(|_| panic!("must not complete"));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            chat.generate_stream_with_cancel(
                vec![ChatMessage::user("hi")],
                GenerateOptions::default(),
                handler,
                cancel,
            ),
        )
        .await
        .expect("returns promptly after cancel");
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(*errors.lock().expect("lock"), vec!["stream cancelled".to_string()]);
    }

    #[tokio::test]
    async fn set_client_swaps_backend() {
        let mut chat = ChatCompletion::new(Arc::new(ScriptedClient::new("a", Vec::new())));
        chat.set_client(Arc::new(ScriptedClient::new("b", Vec::new())));
        assert_eq!(chat.client().model_name(), "b");
    }
}
