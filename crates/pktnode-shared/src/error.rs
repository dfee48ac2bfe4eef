//! Error types for PKT WinNode.

use thiserror::Error;

use crate::network::ValidationError;
use crate::parsers::ParseError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Distribution '{0}' is not installed")]
    NotInstalled(String),

    #[error("Distribution '{0}' must be stopped first")]
    MustBeStopped(String),

    #[error("Distribution '{0}' is not running")]
    NotRunning(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Download error: {0}")]
    Http(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NodeError {
    /// Process exit code used by the control CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::NotInstalled(_) => 3,
            NodeError::MustBeStopped(_) | NodeError::NotRunning(_) => 4,
            NodeError::Validation(_) => 2,
            NodeError::Parse(_) => 5,
            NodeError::Http(_) | NodeError::Checksum { .. } => 6,
            NodeError::Settings(_) | NodeError::Toml(_) => 7,
            NodeError::Io(_) | NodeError::Json(_) | NodeError::Internal(_) => 1,
        }
    }
}
