use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{sse, ChunkStream, ModelEndpoint};
use crate::error::SessionError;
use crate::session::{Message as AppMessage, Role as AppRole};
use crate::tools::{ToolDeclaration, ToolResult};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCallRequestPart {
    pub id: String,
    pub r#type: String, // "function"
    pub function: FunctionCall,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String, // JSON string of arguments
}

/// One entry of the model-visible transcript.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequestPart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>, // For tool role, this is the function name
}

impl ChatMessage {
    fn plain(role: &str, content: &str) -> Self {
        ChatMessage {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::plain("system", content)
    }

    /// Assistant step that asked for tools. Content is omitted when the step
    /// produced no text.
    pub fn assistant_tool_calls(text: &str, calls: Vec<ToolCallRequestPart>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: if text.is_empty() { None } else { Some(text.to_string()) },
            tool_calls: Some(calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        ChatMessage {
            role: "tool".to_string(),
            content: Some(Value::Object(result.data.clone()).to_string()),
            tool_calls: None,
            tool_call_id: Some(result.call_id.clone()),
            name: Some(result.name.clone()),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ToolDefinition {
    pub r#type: String, // "function"
    pub function: FunctionDefinition,
}

#[derive(Serialize, Debug)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Serialize, Debug)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub stream: bool,
}

pub struct OpenAIClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAIClient {
    pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn get_tool_definitions(declarations: &[ToolDeclaration]) -> Vec<ToolDefinition> {
        declarations
            .iter()
            .map(|d| ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: d.name.clone(),
                    description: d.description.clone(),
                    parameters: d.parameters.clone(),
                },
            })
            .collect()
    }

    /// Builds the transcript for a turn: system instruction first, then the
    /// conversation in order.
    pub fn convert_messages(system_prompt: &str, app_messages: &[AppMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(app_messages.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.extend(app_messages.iter().map(|app_msg| {
            let role = match app_msg.role() {
                AppRole::User => "user",
                AppRole::Assistant => "assistant",
            };
            ChatMessage::plain(role, app_msg.content())
        }));
        messages
    }
}

#[async_trait]
impl ModelEndpoint for OpenAIClient {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDeclaration],
    ) -> Result<ChunkStream, SessionError> {
        let request_payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools: if tools.is_empty() { None } else { Some(Self::get_tool_definitions(tools)) },
            tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
            stream: true,
        };

        log::debug!("Sending OpenAI request with {} messages, {} tools", request_payload.messages.len(), tools.len());

        let mut request = self.client.post(self.completions_url()).json(&request_payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            log::error!("OpenAI request failed: {}", e);
            SessionError::transport(self.name(), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI API Error: {} - {}", status, error_text);
            return Err(SessionError::Status {
                endpoint: self.name().to_string(),
                status: status.as_u16(),
                body: error_text,
            });
        }

        Ok(sse::chunk_stream(response.bytes_stream(), self.name().to_string()))
    }
}
