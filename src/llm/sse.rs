// src/llm/sse.rs
//
// Server-Sent Events framing for chat-completion streams. Network chunks do
// not line up with event boundaries, so complete lines are buffered before
// parsing.
use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use super::{ChunkStream, StreamChunk};
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Line framing over raw bytes. Lines are decoded only once complete, so a
/// UTF-8 character split across network chunks survives intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes and returns every event completed by them. A trailing
    /// partial line stays buffered.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Parses whatever is left once the byte stream has ended.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&remaining)).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    // event:, id:, retry: and comments are ignored
    let data = trimmed.strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else if data == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Converts one `data:` payload of an OpenAI-style completion stream.
pub fn parse_completion_chunk(json_str: &str) -> Result<Vec<StreamChunk>, serde_json::Error> {
    let chunk: CompletionChunk = serde_json::from_str(json_str)?;
    let mut out = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            out.push(StreamChunk::Text(text));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            out.push(StreamChunk::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
        if choice.finish_reason.is_some() {
            out.push(StreamChunk::Finish(choice.finish_reason));
        }
    }
    Ok(out)
}

struct SseStreamState {
    parser: SseLineBuffer,
    pending: VecDeque<Result<StreamChunk, SessionError>>,
    finished: bool,
}

impl SseStreamState {
    fn push_events(&mut self, events: Vec<SseEvent>, endpoint: &str) {
        for event in events {
            if self.finished {
                return;
            }
            match event {
                SseEvent::Data(json_str) => match parse_completion_chunk(&json_str) {
                    Ok(chunks) => self.pending.extend(chunks.into_iter().map(Ok)),
                    Err(e) => {
                        log::error!("Unparseable stream payload from {}: {}", endpoint, e);
                        self.pending
                            .push_back(Err(SessionError::protocol(endpoint, format!("bad chunk: {}", e))));
                        self.finished = true;
                    }
                },
                SseEvent::Done => self.finished = true,
            }
        }
    }
}

/// Wraps a response byte stream into a [`ChunkStream`]. The stream ends at
/// `[DONE]`, at end of body, or after the first error.
pub fn chunk_stream<S>(byte_stream: S, endpoint: String) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    let byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>> = Box::pin(byte_stream);

    let stream = unfold((byte_stream, state, endpoint), |(mut bytes, mut state, endpoint)| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, (bytes, state, endpoint)));
            }
            if state.finished {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.parser.feed(&chunk);
                    state.push_events(events, &endpoint);
                }
                Some(Err(e)) => {
                    log::error!("Stream read error from {}: {}", endpoint, e);
                    state.finished = true;
                    let err = SessionError::transport(&endpoint, format!("stream read error: {}", e));
                    return Some((Err(err), (bytes, state, endpoint)));
                }
                None => {
                    let events = state.parser.flush();
                    state.push_events(events, &endpoint);
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}
