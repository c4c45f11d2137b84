//! Error types for deck-core operations.

use std::path::PathBuf;

/// All errors that can occur in deck-core operations.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid profile name: {0}")]
    InvalidProfile(String),

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("SQLite error: {context}: {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    // ─────────────────────────────────────────────────────────────────────
    // Action Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DeckError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DeckError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn sqlite(context: impl Into<String>, source: rusqlite::Error) -> Self {
        DeckError::Sqlite {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        DeckError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using DeckError.
pub type Result<T> = std::result::Result<T, DeckError>;

// Conversion for string error compatibility
impl From<DeckError> for String {
    fn from(err: DeckError) -> String {
        err.to_string()
    }
}
