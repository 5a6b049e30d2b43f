//! Error types for the transfer core.

use crate::ledger::TransferState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SavannahError>;

#[derive(Debug, Error)]
pub enum SavannahError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session error {code}: {message}")]
    Session { code: i32, message: String },

    #[error("Session lock poisoned by a panicked worker")]
    SessionPoisoned,

    #[error("Invalid state transition for '{name}': {from:?} -> {to:?}")]
    InvalidTransition {
        name: String,
        from: TransferState,
        to: TransferState,
    },

    #[error("Worker thread failed: {0}")]
    Worker(String),
}

impl SavannahError {
    /// Numeric code shown next to the message in error notifications.
    pub fn code(&self) -> i32 {
        match self {
            SavannahError::Session { code, .. } => *code,
            SavannahError::Io(e) => e.raw_os_error().unwrap_or(-1),
            _ => -1,
        }
    }
}
