use async_trait::async_trait;
use dih_llm::{
    ChatCompletion, ChunkStream, CompletionClient, CompletionRequest, CompletionResponse,
    LlmError, Provider, RawChunk, Result, TransportEvent,
};
use std::sync::{Arc, Mutex};

/// Canned client: `complete` returns `response`, `stream` replays `chunks`.
pub struct FakeClient {
    pub response: CompletionResponse,
    pub chunks: Vec<String>,
    pub stream_error: Option<String>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeClient {
    pub fn replying(text: &str) -> Self {
        Self {
            response: CompletionResponse {
                id: "resp-1".to_string(),
                model: "fake-model".to_string(),
                text: text.to_string(),
                finish_reason: "stop".to_string(),
                tool_calls: None,
                usage: Some(dih_llm::Usage::new(5, 7)),
            },
            chunks: Vec::new(),
            stream_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn streaming(deltas: &[&str]) -> Self {
        let mut chunks: Vec<String> = deltas
            .iter()
            .map(|d| {
                serde_json::json!({ "id": "s1", "choices": [{ "index": 0, "delta": { "content": d } }] })
                    .to_string()
            })
            .collect();
        chunks.push(
            serde_json::json!({ "id": "s1", "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }] })
                .to_string(),
        );
        Self {
            chunks,
            ..Self::replying("")
        }
    }

    pub fn into_chat(self) -> (ChatCompletion, Arc<FakeClient>) {
        let client = Arc::new(self);
        (ChatCompletion::new(client.clone()), client)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().expect("lock").last().cloned()
    }
}

#[async_trait]
impl CompletionClient for FakeClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().expect("lock").push(request.clone());
        Ok(self.response.clone())
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        self.requests.lock().expect("lock").push(request.clone());
        let mut events: Vec<Result<TransportEvent>> = self
            .chunks
            .iter()
            .map(|c| Ok(TransportEvent::Chunk(RawChunk::OpenAi(c.clone()))))
            .collect();
        match &self.stream_error {
            Some(e) => events.push(Err(LlmError::Http(e.clone()))),
            None => events.push(Ok(TransportEvent::Done)),
        }
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}
