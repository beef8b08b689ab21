//! Raw provider stream chunks and their normalization.
//!
//! A [`RawChunk`] is the `data:` payload of one SSE event, tagged with the wire
//! format it came from. [`normalize`] is a pure function from one chunk to the
//! small ordered list of provider-agnostic events it carries.
//!
//! Chunks that fail to parse are dropped and logged at debug level; the stream
//! carries on with the next one.

use crate::accumulator::ToolCallFragment;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChunk {
    /// OpenAI-style `chat.completion.chunk` JSON.
    OpenAi(String),
    /// Anthropic-style `type`-tagged message stream event JSON.
    Anthropic(String),
}

impl RawChunk {
    pub fn data(&self) -> &str {
        match self {
            Self::OpenAi(data) | Self::Anthropic(data) => data,
        }
    }

    pub fn format(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => "openai",
            Self::Anthropic(_) => "anthropic",
        }
    }
}

/// What a provider adapter hands to a stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Chunk(RawChunk),
    /// Out-of-band end-of-stream sentinel (`data: [DONE]`).
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    Metadata {
        id: Option<String>,
        model: Option<String>,
    },
    TextDelta(String),
    ToolCall(ToolCallFragment),
    Usage {
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    /// Terminal for the session. Always the last event of its chunk.
    Finish(String),
}

pub fn normalize(chunk: &RawChunk) -> Vec<NormalizedEvent> {
    match chunk {
        RawChunk::OpenAi(data) => match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(parsed) => normalize_openai(parsed),
            Err(e) => {
                tracing::debug!(%e, format = "openai", data_len = data.len(), "dropping malformed chunk");
                Vec::new()
            }
        },
        RawChunk::Anthropic(data) => match serde_json::from_str::<AnthropicStreamEvent>(data) {
            Ok(parsed) => normalize_anthropic(parsed),
            Err(e) => {
                tracing::debug!(%e, format = "anthropic", data_len = data.len(), "dropping malformed chunk");
                Vec::new()
            }
        },
    }
}

fn normalize_openai(chunk: OpenAiStreamChunk) -> Vec<NormalizedEvent> {
    let mut events = Vec::new();

    if chunk.id.is_some() || chunk.model.is_some() {
        events.push(NormalizedEvent::Metadata {
            id: chunk.id,
            model: chunk.model,
        });
    }

    if let Some(u) = chunk.usage {
        events.push(NormalizedEvent::Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return events;
    };

    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            events.push(NormalizedEvent::TextDelta(content));
        }
        for tc in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            events.push(NormalizedEvent::ToolCall(ToolCallFragment {
                id: tc.id,
                index: tc.index,
                r#type: tc.r#type,
                function_name: name,
                arguments_fragment: arguments,
            }));
        }
    }

    if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
        events.push(NormalizedEvent::Finish(reason));
    }

    events
}

fn normalize_anthropic(event: AnthropicStreamEvent) -> Vec<NormalizedEvent> {
    match event {
        AnthropicStreamEvent::MessageStart { message } => {
            let mut events = vec![NormalizedEvent::Metadata {
                id: message.id,
                model: message.model,
            }];
            if let Some(u) = message.usage {
                events.push(NormalizedEvent::Usage {
                    prompt_tokens: u.input_tokens,
                    completion_tokens: u.output_tokens,
                });
            }
            events
        }
        AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            AnthropicStreamBlock::ToolUse { id, name } => {
                vec![NormalizedEvent::ToolCall(
                    ToolCallFragment::start(id, name).with_index(index),
                )]
            }
            AnthropicStreamBlock::Text { text } if !text.is_empty() => {
                vec![NormalizedEvent::TextDelta(text)]
            }
            _ => Vec::new(),
        },
        AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
            AnthropicStreamDelta::TextDelta { text } if !text.is_empty() => {
                vec![NormalizedEvent::TextDelta(text)]
            }
            AnthropicStreamDelta::InputJsonDelta { partial_json } => {
                vec![NormalizedEvent::ToolCall(
                    ToolCallFragment::arguments(partial_json).with_index(index),
                )]
            }
            _ => Vec::new(),
        },
        AnthropicStreamEvent::MessageDelta { delta, usage } => {
            let mut events = Vec::new();
            if let Some(u) = usage {
                events.push(NormalizedEvent::Usage {
                    prompt_tokens: u.input_tokens,
                    completion_tokens: u.output_tokens,
                });
            }
            if let Some(reason) = delta.and_then(|d| d.stop_reason) {
                events.push(NormalizedEvent::Finish(map_anthropic_stop_reason(&reason)));
            }
            events
        }
        AnthropicStreamEvent::MessageStop => vec![NormalizedEvent::Finish("stop".to_string())],
        AnthropicStreamEvent::Error { error } => {
            tracing::warn!(error = %error, "anthropic stream reported an error event");
            Vec::new()
        }
        AnthropicStreamEvent::Other => Vec::new(),
    }
}

/// Map Anthropic `stop_reason` values onto the OpenAI vocabulary.
pub fn map_anthropic_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
    .to_string()
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiStreamUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: Option<OpenAiStreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamDeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDeltaToolCall {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    r#type: Option<String>,
    #[serde(default)]
    function: Option<OpenAiStreamDeltaToolFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDeltaToolFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStreamMessage,
    },
    ContentBlockStart {
        #[serde(default)]
        index: u32,
        content_block: AnthropicStreamBlock,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: u32,
        delta: AnthropicStreamDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: Option<AnthropicMessageDeltaBody>,
        #[serde(default)]
        usage: Option<AnthropicStreamUsage>,
    },
    MessageStop,
    Error {
        #[serde(default)]
        error: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicStreamUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai(v: serde_json::Value) -> RawChunk {
        RawChunk::OpenAi(v.to_string())
    }

    fn anthropic(v: serde_json::Value) -> RawChunk {
        RawChunk::Anthropic(v.to_string())
    }

    #[test]
    fn openai_text_and_finish_in_one_chunk() {
        let events = normalize(&openai(serde_json::json!({
            "choices": [{ "delta": { "content": "Hi" }, "finish_reason": "stop" }]
        })));
        assert_eq!(
            events,
            vec![
                NormalizedEvent::TextDelta("Hi".to_string()),
                NormalizedEvent::Finish("stop".to_string()),
            ]
        );
    }

    #[test]
    fn openai_tool_call_fragments_keep_index_and_id() {
        let events = normalize(&openai(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{ "delta": { "tool_calls": [
                { "index": 0, "id": "call_1", "type": "function",
                  "function": { "name": "get_weather", "arguments": "" } },
                { "index": 1, "function": { "arguments": "{}" } }
            ] } }]
        })));

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            NormalizedEvent::Metadata {
                id: Some("chatcmpl-1".to_string()),
                model: Some("gpt-4o".to_string()),
            }
        );
        let NormalizedEvent::ToolCall(first) = &events[1] else {
            panic!("expected tool call fragment");
        };
        assert_eq!(first.id.as_deref(), Some("call_1"));
        assert_eq!(first.function_name.as_deref(), Some("get_weather"));
        assert_eq!(first.index, Some(0));
        let NormalizedEvent::ToolCall(second) = &events[2] else {
            panic!("expected tool call fragment");
        };
        assert_eq!(second.id, None);
        assert_eq!(second.index, Some(1));
        assert_eq!(second.arguments_fragment, "{}");
    }

    #[test]
    fn openai_empty_content_and_null_finish_produce_no_events() {
        let events = normalize(&openai(serde_json::json!({
            "choices": [{ "delta": { "role": "assistant", "content": "" }, "finish_reason": null }]
        })));
        assert!(events.is_empty());
    }

    #[test]
    fn openai_usage_only_chunk() {
        let events = normalize(&openai(serde_json::json!({
            "choices": [],
            "usage": { "prompt_tokens": 3, "completion_tokens": 7 }
        })));
        assert_eq!(
            events,
            vec![NormalizedEvent::Usage {
                prompt_tokens: Some(3),
                completion_tokens: Some(7),
            }]
        );
    }

    #[test]
    fn malformed_chunks_are_dropped() {
        assert!(normalize(&RawChunk::OpenAi("{\"choices\": [".to_string())).is_empty());
        assert!(normalize(&RawChunk::Anthropic("not json".to_string())).is_empty());
    }

    #[test]
    fn anthropic_text_delta() {
        let events = normalize(&anthropic(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": "Hello" }
        })));
        assert_eq!(events, vec![NormalizedEvent::TextDelta("Hello".to_string())]);
    }

    #[test]
    fn anthropic_tool_use_block_and_json_delta() {
        let start = normalize(&anthropic(serde_json::json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": { "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {} }
        })));
        assert_eq!(
            start,
            vec![NormalizedEvent::ToolCall(
                ToolCallFragment::start("toolu_1", "get_weather").with_index(1)
            )]
        );

        let delta = normalize(&anthropic(serde_json::json!({
            "type": "content_block_delta",
            "index": 1,
            "delta": { "type": "input_json_delta", "partial_json": "{\"loc\":" }
        })));
        assert_eq!(
            delta,
            vec![NormalizedEvent::ToolCall(
                ToolCallFragment::arguments("{\"loc\":").with_index(1)
            )]
        );
    }

    #[test]
    fn anthropic_message_start_carries_metadata_and_usage() {
        let events = normalize(&anthropic(serde_json::json!({
            "type": "message_start",
            "message": { "id": "msg_1", "model": "claude-3-haiku", "usage": { "input_tokens": 12, "output_tokens": 1 } }
        })));
        assert_eq!(
            events,
            vec![
                NormalizedEvent::Metadata {
                    id: Some("msg_1".to_string()),
                    model: Some("claude-3-haiku".to_string()),
                },
                NormalizedEvent::Usage {
                    prompt_tokens: Some(12),
                    completion_tokens: Some(1),
                },
            ]
        );
    }

    #[test]
    fn anthropic_message_delta_finish_is_last() {
        let events = normalize(&anthropic(serde_json::json!({
            "type": "message_delta",
            "delta": { "stop_reason": "tool_use" },
            "usage": { "output_tokens": 20 }
        })));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], NormalizedEvent::Finish("tool_calls".to_string()));
    }

    #[test]
    fn anthropic_message_stop_finishes() {
        let events = normalize(&anthropic(serde_json::json!({ "type": "message_stop" })));
        assert_eq!(events, vec![NormalizedEvent::Finish("stop".to_string())]);
    }

    #[test]
    fn anthropic_unknown_events_are_ignored() {
        assert!(normalize(&anthropic(serde_json::json!({ "type": "ping" }))).is_empty());
        assert!(
            normalize(&anthropic(serde_json::json!({ "type": "content_block_stop", "index": 0 })))
                .is_empty()
        );
    }

    #[test]
    fn stop_reasons_map_to_openai_vocabulary() {
        assert_eq!(map_anthropic_stop_reason("end_turn"), "stop");
        assert_eq!(map_anthropic_stop_reason("max_tokens"), "length");
        assert_eq!(map_anthropic_stop_reason("refusal"), "refusal");
    }
}
