// src/llm/mod.rs
pub mod offline;
pub mod openai_client;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::SessionError;
use crate::tools::ToolDeclaration;

pub use openai_client::ChatMessage;

/// One increment of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Prose tokens to show immediately.
    Text(String),
    /// A fragment of a tool call. Fragments with the same `index` belong to
    /// one call; `arguments` pieces are concatenated in arrival order.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// The model finished the current step.
    Finish(Option<String>),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, SessionError>> + Send>>;

/// A model-serving endpoint that answers a transcript incrementally.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    fn name(&self) -> &str;

    /// Sends the whole transcript and tool declarations in one request.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDeclaration],
    ) -> Result<ChunkStream, SessionError>;
}
