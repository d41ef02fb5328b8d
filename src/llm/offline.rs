// src/llm/offline.rs
//
// Canned responder used when no model provider is configured. It streams its
// replies in small chunks so callers exercise the same path as a live
// endpoint.
use async_trait::async_trait;
use futures_util::stream;

use super::{ChatMessage, ChunkStream, ModelEndpoint, StreamChunk};
use crate::error::SessionError;
use crate::tools::canned::ANALYZE_CODE;
use crate::tools::ToolDeclaration;

const JAVASCRIPT_REPLY: &str = "Here's an example of modern JavaScript code:

```javascript
// Async/await example
async function fetchUserData(userId) {
  try {
    const response = await fetch(`https://api.example.com/users/${userId}`);
    if (!response.ok) {
      throw new Error('Failed to fetch user data');
    }
    const data = await response.json();
    return data;
  } catch (error) {
    console.error('Error:', error);
    return null;
  }
}
```

This pattern uses async/await for cleaner asynchronous code handling.";

const DIAGRAM_REPLY: &str = "Here's a diagram showing the component lifecycle:

```mermaid
graph TD
    A[\"Component Created\"] --> B[\"Mount Phase\"]
    B --> C[\"Update Phase\"]
    C --> D[\"Unmount Phase\"]
    C --> B
```

Open the diagram to inspect its source.";

const DEFAULT_REPLY: &str = "I can help you analyze your code. Paste a snippet and ask about bugs, performance or structure.";

#[derive(Debug, Default)]
pub struct OfflineEndpoint;

impl OfflineEndpoint {
    pub fn new() -> Self {
        Self
    }

    /// Picks the reply for a prompt the same way for every call.
    pub fn reply_for(prompt: &str) -> &'static str {
        let lower = prompt.to_lowercase();
        if lower.contains("javascript") {
            JAVASCRIPT_REPLY
        } else if lower.contains("diagram") || lower.contains("flow") {
            DIAGRAM_REPLY
        } else {
            DEFAULT_REPLY
        }
    }

    fn script(messages: &[ChatMessage], tools: &[ToolDeclaration]) -> Vec<StreamChunk> {
        // Last tool output, if the previous step asked for one.
        if let Some(last) = messages.last().filter(|m| m.role == "tool") {
            let analysis = serde_json::from_str::<serde_json::Value>(last.content.as_deref().unwrap_or("{}"))
                .ok()
                .and_then(|v| v.get("analysis").and_then(|a| a.as_str()).map(String::from))
                .unwrap_or_else(|| "The tool returned no analysis.".to_string());
            return text_chunks(&format!("Here is what the analyzer found:\n\n{}", analysis));
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        let wants_analysis = prompt.to_lowercase().starts_with("analyze")
            && tools.iter().any(|t| t.name == ANALYZE_CODE);
        if wants_analysis {
            let arguments = serde_json::json!({ "code": prompt, "language": "text" }).to_string();
            return vec![
                StreamChunk::ToolCall {
                    index: 0,
                    id: Some("offline_call_0".to_string()),
                    name: Some(ANALYZE_CODE.to_string()),
                    arguments,
                },
                StreamChunk::Finish(Some("tool_calls".to_string())),
            ];
        }

        text_chunks(Self::reply_for(&prompt))
    }
}

/// Splits text after each whitespace run so concatenating the chunks gives
/// back the input.
fn text_chunks(text: &str) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut prev_ws = false;
    for c in text.chars() {
        if prev_ws && !c.is_whitespace() {
            chunks.push(StreamChunk::Text(std::mem::take(&mut current)));
        }
        prev_ws = c.is_whitespace();
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(StreamChunk::Text(current));
    }
    chunks.push(StreamChunk::Finish(Some("stop".to_string())));
    chunks
}

#[async_trait]
impl ModelEndpoint for OfflineEndpoint {
    fn name(&self) -> &str {
        "offline"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDeclaration],
    ) -> Result<ChunkStream, SessionError> {
        let chunks = Self::script(messages, tools);
        log::debug!("Offline endpoint answering with {} chunks", chunks.len());
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}
