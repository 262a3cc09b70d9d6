use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnePagerError {
    // Remote tool service errors
    #[error("Remote tool failed: {tool}: {message}")]
    RemoteTool { tool: String, message: String },

    #[error("Session error: {0}")]
    Session(String),

    // Protocol / interop mismatches
    #[error("Contract violation in {step}: {message}")]
    Contract { step: String, message: String },

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OnePagerError {
    pub fn remote(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn contract(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Contract {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Contract violations abort a run; everything else is absorbed by steps.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract { .. })
    }
}

pub type Result<T> = std::result::Result<T, OnePagerError>;
