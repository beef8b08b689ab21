//! Streaming response reassembly.
//!
//! A [`StreamSession`] owns the state of exactly one streaming request. It is the
//! single writer: every mutation goes through `&mut self`, and readers only get
//! `&self` views or the values handed to [`StreamHandler`] callbacks.
//!
//! ```text
//! Idle -> Streaming -> Completed
//!                   \-> Failed
//! ```

use crate::accumulator::ToolCallAccumulator;
use crate::chunk::{NormalizedEvent, RawChunk, TransportEvent, normalize};
use crate::error::{LlmError, Result};
use crate::types::{CompletionResponse, StreamingResponse, ToolCall, UNKNOWN_FINISH_REASON, Usage};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Observer for one stream. Every method defaults to a no-op.
pub trait StreamHandler {
    /// Cumulative text so far, fired once per text delta.
    fn on_text_update(&mut self, _text: &str) {}

    /// Fired once, never together with `on_error`.
    fn on_complete(&mut self, _response: &CompletionResponse) {}

    fn on_error(&mut self, _error: &LlmError) {}

    /// Every chunk, before normalization.
    fn on_raw_chunk(&mut self, _chunk: &RawChunk) {}
}

impl StreamHandler for () {}

impl<H: StreamHandler + ?Sized> StreamHandler for &mut H {
    fn on_text_update(&mut self, text: &str) {
        (**self).on_text_update(text)
    }

    fn on_complete(&mut self, response: &CompletionResponse) {
        (**self).on_complete(response)
    }

    fn on_error(&mut self, error: &LlmError) {
        (**self).on_error(error)
    }

    fn on_raw_chunk(&mut self, chunk: &RawChunk) {
        (**self).on_raw_chunk(chunk)
    }
}

type TextFn = Box<dyn FnMut(&str) + Send>;
type CompleteFn = Box<dyn FnMut(&CompletionResponse) + Send>;
type ErrorFn = Box<dyn FnMut(&LlmError) + Send>;
type RawFn = Box<dyn FnMut(&RawChunk) + Send>;

/// Closure-backed [`StreamHandler`].
#[derive(Default)]
pub struct StreamCallbacks {
    text: Option<TextFn>,
    complete: Option<CompleteFn>,
    error: Option<ErrorFn>,
    raw: Option<RawFn>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_text_update(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.text = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnMut(&CompletionResponse) + Send + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&LlmError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_raw_chunk(mut self, f: impl FnMut(&RawChunk) + Send + 'static) -> Self {
        self.raw = Some(Box::new(f));
        self
    }
}

impl StreamHandler for StreamCallbacks {
    fn on_text_update(&mut self, text: &str) {
        if let Some(f) = self.text.as_mut() {
            f(text);
        }
    }

    fn on_complete(&mut self, response: &CompletionResponse) {
        if let Some(f) = self.complete.as_mut() {
            f(response);
        }
    }

    fn on_error(&mut self, error: &LlmError) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }

    fn on_raw_chunk(&mut self, chunk: &RawChunk) {
        if let Some(f) = self.raw.as_mut() {
            f(chunk);
        }
    }
}

#[derive(Debug, Default)]
struct StreamState {
    text: String,
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<String>,
    id: Option<String>,
    model: Option<String>,
    usage: Option<Usage>,
}

pub struct StreamSession<H = ()> {
    state: SessionState,
    stream: StreamState,
    /// Model name used when the provider never reports one.
    fallback_model: String,
    response: Option<CompletionResponse>,
    handler: H,
}

impl StreamSession<()> {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_handler(model, ())
    }
}

impl<H: StreamHandler> StreamSession<H> {
    pub fn with_handler(model: impl Into<String>, handler: H) -> Self {
        Self {
            state: SessionState::Idle,
            stream: StreamState::default(),
            fallback_model: model.into(),
            response: None,
            handler,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.stream.text
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.stream.tool_calls.calls()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn snapshot(&self) -> StreamingResponse {
        let calls = self.stream.tool_calls.calls();
        StreamingResponse {
            text: self.stream.text.clone(),
            is_done: self.state.is_terminal(),
            finish_reason: self.stream.finish_reason.clone(),
            tool_calls: (!calls.is_empty()).then(|| calls.to_vec()),
        }
    }

    /// Apply one raw chunk. Chunks arriving after a terminal state are ignored.
    pub fn ingest(&mut self, chunk: &RawChunk) {
        match self.state {
            SessionState::Idle => self.state = SessionState::Streaming,
            SessionState::Streaming => {}
            SessionState::Completed | SessionState::Failed => {
                tracing::debug!(
                    state = ?self.state,
                    format = chunk.format(),
                    bytes = chunk.data().len(),
                    "ignoring chunk after stream end"
                );
                return;
            }
        }

        self.handler.on_raw_chunk(chunk);

        for event in normalize(chunk) {
            match event {
                NormalizedEvent::Metadata { id, model } => {
                    if id.is_some() {
                        self.stream.id = id;
                    }
                    if model.is_some() {
                        self.stream.model = model;
                    }
                }
                NormalizedEvent::TextDelta(delta) => {
                    self.stream.text.push_str(&delta);
                    self.handler.on_text_update(&self.stream.text);
                }
                NormalizedEvent::ToolCall(fragment) => self.stream.tool_calls.apply(fragment),
                NormalizedEvent::Usage {
                    prompt_tokens,
                    completion_tokens,
                } => {
                    let current = self.stream.usage.unwrap_or_default();
                    self.stream.usage = Some(Usage::new(
                        prompt_tokens.unwrap_or(current.prompt_tokens),
                        completion_tokens.unwrap_or(current.completion_tokens),
                    ));
                }
                NormalizedEvent::Finish(reason) => {
                    self.stream.finish_reason = Some(reason);
                    self.mark_completed();
                    return;
                }
            }
        }
    }

    /// End of input: the `[DONE]` sentinel or the transport closing normally.
    pub fn complete(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Streaming => self.mark_completed(),
            SessionState::Completed => {}
            SessionState::Failed => {
                tracing::debug!("ignoring completion of a failed stream");
            }
        }
    }

    fn mark_completed(&mut self) {
        self.state = SessionState::Completed;
        if self.stream.finish_reason.is_none() {
            tracing::debug!("stream ended without a finish reason");
        }
        // Cannot fail once Completed.
        let _ = self.finalize();
    }

    /// Build the final response. The first call fires `on_complete`; later calls
    /// return the same cached value.
    pub fn finalize(&mut self) -> Result<CompletionResponse> {
        if self.state != SessionState::Completed {
            return Err(LlmError::InvalidState(format!(
                "finalize requires a completed stream, session is {:?}",
                self.state
            )));
        }
        if let Some(response) = &self.response {
            return Ok(response.clone());
        }

        let calls = self.stream.tool_calls.calls();
        let response = CompletionResponse {
            id: self.stream.id.clone().unwrap_or_default(),
            model: self
                .stream
                .model
                .clone()
                .unwrap_or_else(|| self.fallback_model.clone()),
            text: self.stream.text.clone(),
            finish_reason: self
                .stream
                .finish_reason
                .clone()
                .unwrap_or_else(|| UNKNOWN_FINISH_REASON.to_string()),
            tool_calls: (!calls.is_empty()).then(|| calls.to_vec()),
            usage: self.stream.usage,
        };
        tracing::debug!(
            finish_reason = %response.finish_reason,
            text_len = response.text.len(),
            tool_calls = response.tool_calls().len(),
            "stream completed"
        );
        self.handler.on_complete(&response);
        self.response = Some(response.clone());
        Ok(response)
    }

    /// Terminate with a transport-level error. Ignored once terminal.
    pub fn fail(&mut self, error: &LlmError) {
        if self.state.is_terminal() {
            tracing::debug!(state = ?self.state, %error, "ignoring error after stream end");
            return;
        }
        tracing::warn!(
            %error,
            transport = error.is_transport(),
            text_len = self.stream.text.len(),
            "stream failed"
        );
        self.state = SessionState::Failed;
        self.handler.on_error(error);
    }

    /// Fail with [`LlmError::Cancelled`] and drop whatever was accumulated.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.fail(&LlmError::Cancelled);
        self.stream = StreamState::default();
    }

    /// Return to `Idle` for another request.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == SessionState::Streaming {
            return Err(LlmError::InvalidState(
                "cannot reset a session while it is streaming".to_string(),
            ));
        }
        self.state = SessionState::Idle;
        self.stream = StreamState::default();
        self.response = None;
        Ok(())
    }

    /// Drive the session from a transport stream until it completes, fails, or
    /// `cancel` fires. One read is pending at a time.
    #[tracing::instrument(level = "info", skip_all, fields(model = %self.fallback_model))]
    pub async fn run<S>(&mut self, stream: S, cancel: CancellationToken) -> Result<CompletionResponse>
    where
        S: Stream<Item = Result<TransportEvent>>,
    {
        if self.state.is_terminal() {
            return Err(LlmError::InvalidState(format!(
                "session is {:?}; reset it before running another stream",
                self.state
            )));
        }

        let mut stream = std::pin::pin!(stream);
        while self.state != SessionState::Completed {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.cancel();
                    return Err(LlmError::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(TransportEvent::Chunk(chunk))) => self.ingest(&chunk),
                Some(Ok(TransportEvent::Done)) | None => self.complete(),
                Some(Err(error)) => {
                    self.fail(&error);
                    return Err(error);
                }
            }
        }

        self.finalize()
    }
}
