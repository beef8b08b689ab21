//! Server-sent-event framing.
//!
//! Bytes are buffered until a blank line terminates an event, so lines and
//! multi-byte UTF-8 sequences split across network reads are reassembled before
//! anything is decoded.

use crate::chunk::{RawChunk, TransportEvent};
use crate::client::ChunkStream;
use crate::error::{LlmError, Result};
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;
use std::collections::VecDeque;

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    scan: Scan,
}

/// Where boundary scanning resumes, so bytes already examined are not rescanned.
#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    pos: usize,
    line_start: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some((body_end, consumed)) = find_event_boundary(&self.buffer, &mut self.scan) {
            let raw: Vec<u8> = self.buffer.drain(..consumed).collect();
            self.scan = Scan::default();
            if let Some(event) = parse_event(&raw[..body_end]) {
                out.push(event);
            }
        }
        out
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let raw = std::mem::take(&mut self.buffer);
        self.scan = Scan::default();
        parse_event(&raw)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Returns `(end of event body, bytes to consume)` for the first complete event,
/// resuming from `scan`. On `None`, `scan` records how far the buffer was read.
fn find_event_boundary(buf: &[u8], scan: &mut Scan) -> Option<(usize, usize)> {
    let mut line_start = scan.line_start;
    let mut i = scan.pos;
    while i < buf.len() {
        match buf[i] {
            b'\n' | b'\r' => {
                let mut term = 1;
                if buf[i] == b'\r' {
                    // A lone trailing CR may be the first half of CRLF.
                    let Some(next) = buf.get(i + 1) else {
                        *scan = Scan { pos: i, line_start };
                        return None;
                    };
                    if *next == b'\n' {
                        term = 2;
                    }
                }
                if i == line_start {
                    return Some((line_start, i + term));
                }
                i += term;
                line_start = i;
            }
            _ => i += 1,
        }
    }
    *scan = Scan { pos: i, line_start };
    None
}

fn parse_event(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.split(['\n', '\r']) {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

pub fn decode_sse<S, E>(bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(bytes_stream), SseDecoder::new(), VecDeque::new(), false),
        |(mut stream, mut decoder, mut pending, mut ended)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (stream, decoder, pending, ended)));
                }
                if ended {
                    return None;
                }
                match stream.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        return Some((
                            Err(LlmError::Http(e.to_string())),
                            (stream, decoder, pending, true),
                        ));
                    }
                    None => {
                        ended = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    )
}

/// Map decoded SSE events onto the session's transport contract.
pub(crate) fn transport_events<S>(sse: S, wrap: fn(String) -> RawChunk) -> ChunkStream
where
    S: Stream<Item = Result<SseEvent>> + Send + 'static,
{
    Box::pin(sse.filter_map(move |item| async move {
        match item {
            Ok(event) if event.data.trim() == DONE_SENTINEL => Some(Ok(TransportEvent::Done)),
            Ok(event) if event.data.trim().is_empty() => None,
            Ok(event) => match provider_error(&event) {
                Some(error) => Some(Err(error)),
                None => Some(Ok(TransportEvent::Chunk(wrap(event.data)))),
            },
            Err(e) => Some(Err(e)),
        }
    }))
}

/// Error events sent inside an otherwise successful stream: an SSE `event:
/// error`, an Anthropic `{"type":"error"}` payload, or an OpenAI-style
/// top-level `{"error": {..}}` object.
fn provider_error(event: &SseEvent) -> Option<LlmError> {
    let named = event.event.as_deref() == Some("error");
    if !named && !event.data.contains("\"error\"") {
        return None;
    }
    let payload: serde_json::Value =
        serde_json::from_str(&event.data).unwrap_or(serde_json::Value::Null);
    let typed = payload.get("type").and_then(|t| t.as_str()) == Some("error");
    let wrapped = payload.get("error").is_some_and(|e| e.is_object()) && payload.get("choices").is_none();
    if !(named || typed || wrapped) {
        return None;
    }

    let detail = payload
        .get("error")
        .and_then(|e| e.get("message").or_else(|| e.get("type")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| event.data.trim().to_string());
    tracing::warn!(error = %detail, "provider reported an error mid-stream");
    Some(LlmError::Http(format!("stream error event: {detail}")))
}
