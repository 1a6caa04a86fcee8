//! Error types for signageFlow.
//!
//! Engine-internal conditions (empty queue, duplicate interval trigger,
//! decode failure, missing files) are recovered where they happen and only
//! show up as status text. The variants here cover what management
//! operations and the persistence layer can hand back to a caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Group '{0}' not found")]
    UnknownGroup(String),

    #[error("Group '{0}' already exists")]
    DuplicateGroup(String),

    #[error("Invalid group name '{0}'")]
    InvalidName(String),

    #[error("Media item '{0}' not found")]
    UnknownItem(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
