//! Error types for timebox.

use thiserror::Error;

/// Convenience alias used across the timebox crates.
pub type Result<T, E = TimeboxError> = std::result::Result<T, E>;

/// Top-level error type for timer, trainer and checkpoint operations.
#[derive(Debug, Error)]
pub enum TimeboxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid duration '{input}': expected HH:MM:SS ({reason})")]
    InvalidDuration { input: String, reason: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Rank {rank} stopped because another rank failed")]
    Aborted { rank: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TimeboxError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_duration(input: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidDuration {
            input: input.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<Box<figment::Error>> for TimeboxError {
    fn from(err: Box<figment::Error>) -> Self {
        Self::Config(err.to_string())
    }
}
