//! Error types for the sync engine.

use thiserror::Error;
use tidesync_core::crypto::CryptoError;
use tidesync_core::CoreError;
use tidesync_protocol::{DeviceId, GroupId, OperationKind, ProtocolError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Undecodable fields and missing dependencies are not errors: they surface
/// in [`ApplyOutcome`](crate::ApplyOutcome) instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Encryption failed while capturing a change.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Store or schema collaborator failed.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// Wire encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A second pass was started on a group that already has one in flight.
    #[error("group {group} already has a sync pass in flight")]
    ConcurrencyViolation {
        /// The contended group.
        group: GroupId,
    },

    /// A record was applied under a pass for a different group.
    #[error("record for group {actual} applied in a pass for group {expected}")]
    WrongGroup {
        /// Group of the pass.
        expected: GroupId,
        /// Group named by the record.
        actual: GroupId,
    },

    /// A local change could not be captured as given.
    #[error("invalid {operation:?} change: {reason}")]
    InvalidChange {
        /// Operation kind of the rejected change.
        operation: OperationKind,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration does not match the key material.
    #[error("configured device {configured} does not match key material device {material}")]
    DeviceMismatch {
        /// Device id from the configuration.
        configured: DeviceId,
        /// Device id from the key material.
        material: DeviceId,
    },
}

impl SyncError {
    /// Creates an invalid change error.
    pub fn invalid_change(operation: OperationKind, reason: impl Into<String>) -> Self {
        Self::InvalidChange {
            operation,
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from overlapping passes on one group.
    pub fn is_concurrency_violation(&self) -> bool {
        matches!(self, SyncError::ConcurrencyViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_violation_names_group() {
        let group = GroupId::from_name("teamA");
        let err = SyncError::ConcurrencyViolation { group };
        assert!(err.is_concurrency_violation());
        assert!(err.to_string().contains(&group.to_string()));
    }

    #[test]
    fn converts_lower_layer_errors() {
        let err: SyncError = CryptoError::integrity().into();
        assert!(matches!(err, SyncError::Crypto(_)));

        let err: SyncError = ProtocolError::UnknownOperation(9).into();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(!err.is_concurrency_violation());
    }

    #[test]
    fn invalid_change_display() {
        let err = SyncError::invalid_change(OperationKind::Delete, "delete carries fields");
        assert_eq!(err.to_string(), "invalid Delete change: delete carries fields");
    }
}
