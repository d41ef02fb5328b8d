// src/error.rs
use thiserror::Error;

/// Input rejected before any side effect ran.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid argument `{field}` for tool `{tool}`: {message}")]
pub struct ValidationError {
    pub tool: String,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(tool: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("tool `{tool}` failed: {message}")]
    Execution { tool: String, message: String },
    #[error("tool `{tool}` timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
}

/// Terminal failure of a conversational turn or an endpoint call.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("malformed stream from {endpoint}: {message}")]
    Protocol { endpoint: String, message: String },
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("turn exceeded {0} tool steps")]
    TooManySteps(usize),
    #[error("a turn is already in progress")]
    Busy,
    #[error("turn cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn transport(endpoint: &str, err: impl std::fmt::Display) -> Self {
        SessionError::Transport {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }

    pub fn protocol(endpoint: &str, message: impl Into<String>) -> Self {
        SessionError::Protocol {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("diagram source is empty")]
    EmptySource,
    #[error("renderer rejected diagram: {0}")]
    Renderer(String),
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
}

/// Repository identifier rejected by client-side validation. The display
/// string is the user-facing message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("Please enter a repository")]
    Empty,
    #[error("Please enter a valid repository in the format 'user_name/repo_name' or 'https://github.com/user_name/repo_name'")]
    InvalidFormat,
}
