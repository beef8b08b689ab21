use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("api error: status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("stream cancelled")]
    Cancelled,

    #[error("invalid arguments for tool {name}: {reason}")]
    ToolArguments { name: String, reason: String },

    #[error("required variable {0} is missing")]
    MissingVariable(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl LlmError {
    /// Errors that end a stream rather than being contained per chunk.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Api { .. } | Self::ResponseFormat(_) | Self::Cancelled
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
