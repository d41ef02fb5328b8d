// src/tools/mod.rs
pub mod canned;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{ToolError, ValidationError};

pub type ToolArgs = Map<String, Value>;

pub(super) fn get_string_arg(args: &ToolArgs, name: &str) -> Result<String, String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| format!("Missing or invalid string argument: {}", name))
}

pub(super) fn get_optional_string_arg(args: &ToolArgs, name: &str) -> Option<String> {
    args.get(name).and_then(Value::as_str).map(String::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    fn json_name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

/// Structural schema for a tool's JSON object arguments.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    params: Vec<ParamSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, param_type: ParamType, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, param_type: ParamType, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: false,
        });
        self
    }

    /// JSON Schema object advertised to the model.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                json!({ "type": p.param_type.json_name(), "description": p.description }),
            );
        }
        let required: Vec<&str> = self.params.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks `args` against the schema. Undeclared properties are dropped.
    pub fn validate(&self, tool: &str, args: &Value) -> Result<ToolArgs, ValidationError> {
        let object = args
            .as_object()
            .ok_or_else(|| ValidationError::new(tool, "arguments", "expected a JSON object"))?;

        let mut validated = Map::new();
        for p in &self.params {
            match object.get(&p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(ValidationError::new(tool, &p.name, "required field is missing"));
                }
                None | Some(Value::Null) => {}
                Some(value) if !p.param_type.accepts(value) => {
                    return Err(ValidationError::new(
                        tool,
                        &p.name,
                        format!("expected {}", p.param_type.json_name()),
                    ));
                }
                Some(value) => {
                    validated.insert(p.name.clone(), value.clone());
                }
            }
        }
        Ok(validated)
    }
}

/// Capability behind a tool. Implementations must not touch conversation
/// history.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: &ToolArgs) -> Result<Value, String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub data: ToolArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

struct RegisteredTool {
    name: String,
    description: String,
    schema: ParameterSchema,
    executor: Arc<dyn ToolExecutor>,
}

pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { tools: Vec::new(), timeout }
    }

    /// Registry holding the stock `analyzeCode` and `searchDocs` tools.
    pub fn with_builtin_tools(timeout: Duration) -> Self {
        let mut registry = Self::new(timeout);
        canned::register_builtin_tools(&mut registry);
        registry
    }

    /// Registers a tool, replacing any earlier one with the same name.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        schema: ParameterSchema,
        executor: Arc<dyn ToolExecutor>,
    ) {
        let tool = RegisteredTool {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            executor,
        };
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name == name) {
            log::warn!("Replacing already registered tool '{}'", name);
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(|t| ToolDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.schema.to_json_schema(),
            })
            .collect()
    }

    fn find(&self, name: &str) -> Result<&RegisteredTool, ToolError> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))
    }

    /// Builds a validated call from the raw JSON argument string the model sent.
    pub fn prepare_call(&self, id: &str, name: &str, raw_arguments: &str) -> Result<ToolCall, ToolError> {
        let tool = self.find(name)?;
        let raw = if raw_arguments.trim().is_empty() { "{}" } else { raw_arguments };
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|e| ValidationError::new(name, "arguments", format!("invalid JSON: {}", e)))?;
        let arguments = tool.schema.validate(name, &parsed)?;
        Ok(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        })
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let tool = self.find(&call.name)?;
        log::info!("Executing tool: {} (ID: {})", call.name, call.id);
        log::debug!("Tool args: {:?}", call.arguments);

        let output = tokio::time::timeout(self.timeout, tool.executor.execute(&call.arguments))
            .await
            .map_err(|_| ToolError::Timeout {
                tool: call.name.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|message| ToolError::Execution {
                tool: call.name.clone(),
                message,
            })?;

        let data = match output {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Ok(ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            data,
        })
    }
}
