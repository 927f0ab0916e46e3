//! Error types for tidesync core.

use crate::crypto::CryptoError;
use thiserror::Error;
use tidesync_protocol::EntityRef;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Field encryption or decryption error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The persistence layer refused or failed a write.
    #[error("store error on {target}: {message}")]
    Store {
        /// Object the write targeted.
        target: String,
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a store error for `target`.
    pub fn store(target: &EntityRef, message: impl Into<String>) -> Self {
        Self::Store {
            target: target.to_string(),
            message: message.into(),
        }
    }
}
