//! Error types for the terminal

use thiserror::Error;

/// Terminal-wide error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TerminalError {
    pub fn api(msg: impl Into<String>) -> Self {
        TerminalError::Api(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        TerminalError::Network(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        TerminalError::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TerminalError::Config(msg.into())
    }
}

/// Result type alias for terminal operations
pub type TerminalResult<T> = Result<T, TerminalError>;
