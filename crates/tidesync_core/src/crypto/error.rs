//! Crypto error types.

use thiserror::Error;
use tidesync_protocol::TypeTag;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors produced by the field cipher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The sealed bytes are malformed: bad scheme, truncated, undecodable
    /// payload or a value that does not fit its type tag.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the problem.
        message: String,
    },

    /// Authentication failed: wrong key, tampered bytes or swapped tag.
    #[error("integrity check failed")]
    Integrity,

    /// Sealing failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// A value was offered under a tag that cannot hold it.
    #[error("value does not fit type tag {tag:?}")]
    TagMismatch {
        /// The offending tag.
        tag: TypeTag,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivation {
        /// Description of the failure.
        message: String,
    },
}

impl CryptoError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity() -> Self {
        Self::Integrity
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivation {
            message: message.into(),
        }
    }

    /// Returns true for malformed-input errors.
    pub fn is_decode(&self) -> bool {
        matches!(self, CryptoError::Decode { .. })
    }

    /// Returns true for authentication failures.
    pub fn is_integrity(&self) -> bool {
        matches!(self, CryptoError::Integrity)
    }
}
