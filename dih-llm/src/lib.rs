//! Thin chat completion client for OpenAI- and Anthropic-style APIs.
//!
//! Streaming responses are reassembled by a [`StreamSession`]: raw SSE chunks
//! from either provider are normalized into one event vocabulary, text and
//! tool-call fragments are accumulated, and a single [`CompletionResponse`] is
//! produced when the stream ends.

mod accumulator;
mod anthropic;
mod chunk;
mod client;
mod completion;
mod error;
mod openai;
mod prompt;
mod session;
mod sse;
mod tokens;
mod types;

pub use accumulator::{ToolCallAccumulator, ToolCallFragment};
pub use anthropic::AnthropicClient;
pub use chunk::{NormalizedEvent, RawChunk, TransportEvent, map_anthropic_stop_reason, normalize};
pub use client::{
    ChunkStream, ClientConfig, CompletionClient, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    DEFAULT_TEMPERATURE, LlmClient, Provider, rough_token_count,
};
pub use completion::{ChatCompletion, GenerateOptions};
pub use error::{LlmError, Result};
pub use openai::OpenAiClient;
pub use prompt::{PromptTemplate, TemplateVariable};
pub use session::{SessionState, StreamCallbacks, StreamHandler, StreamSession};
pub use sse::{DONE_SENTINEL, SseDecoder, SseEvent, decode_sse};
pub use tokens::{
    ModelPricing, estimate_cost, estimate_token_count, pricing_for, tokens_to_chars,
    truncate_to_token_limit,
};
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, FunctionCall, Role, StreamingResponse,
    ToolCall, ToolChoice, ToolDefinition, UNKNOWN_FINISH_REASON, Usage,
};

pub use tokio_util::sync::CancellationToken;
