//! Error types for the airdrop executor

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the executor
#[derive(Error, Debug)]
pub enum AirdropError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Transient failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Broadcast failed after {attempts} attempts: {message}")]
    Submission { attempts: u32, message: String },

    #[error("Batch rejected {attempts} times in a row, last reason: {reason}")]
    PersistentRejection { attempts: u32, reason: String },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Queue storage error at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AirdropError {
    /// Shorthand for a transport-level failure of `operation`
    pub fn transient(operation: impl Into<String>, message: impl ToString) -> Self {
        AirdropError::Transient {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for an I/O failure on a queue file
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AirdropError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AirdropError::Transient { .. })
    }

    /// Check if error must stop the process instead of waiting for the next block
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AirdropError::Config(_)
                | AirdropError::MissingCredential(_)
                | AirdropError::UnknownNetwork(_)
                | AirdropError::Submission { .. }
                | AirdropError::PersistentRejection { .. }
                | AirdropError::Signing(_)
                | AirdropError::Storage { .. }
        )
    }
}

/// Result type for executor operations
pub type AirdropResult<T> = Result<T, AirdropError>;
