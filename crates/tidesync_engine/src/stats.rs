//! Counters and per-call reports.

use crate::error::SyncError;
use std::time::Instant;
use tidesync_protocol::{EntityRef, GroupId};

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Local changes captured into a queue.
    pub captured: u64,
    /// Remote changes written to the store, including replays.
    pub applied: u64,
    /// Remote changes rejected because their object was deleted.
    pub rejected: u64,
    /// Times a change entered the deferred buffer.
    pub deferred: u64,
    /// Deferred changes taken out of the buffer and retried.
    pub replayed: u64,
    /// Re-delivered changes that were already processed.
    pub duplicates: u64,
    /// Fields dropped because they could not be decrypted.
    pub field_decode_failures: u64,
    /// Fields parked because the local schema lacked their property.
    pub parked_fields: u64,
    /// Parked fields written once their property became known.
    pub adopted_fields: u64,
    /// Apply passes completed.
    pub passes: u64,
    /// End of the last completed pass.
    pub last_pass: Option<Instant>,
}

/// What happened to one incoming change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Written to the store.
    Applied {
        /// Fields left unset because they failed to decrypt.
        skipped_fields: usize,
    },
    /// Dropped because the object was deleted.
    Rejected,
    /// Buffered until `waiting_on` exists locally.
    Deferred {
        /// The missing object.
        waiting_on: EntityRef,
    },
    /// Already processed; nothing changed.
    Duplicate,
}

impl ApplyOutcome {
    /// Returns true for [`ApplyOutcome::Applied`].
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Tally of one group's pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Changes written to the store, including replays.
    pub applied: usize,
    /// Changes rejected by a delete.
    pub rejected: usize,
    /// Changes left in the deferred buffer.
    pub deferred: usize,
    /// Deferred changes retried during the pass.
    pub replayed: usize,
    /// Re-delivered changes.
    pub duplicates: usize,
    /// Fields dropped on decrypt.
    pub skipped_fields: usize,
    /// Fields parked for a property the local schema does not know.
    pub parked_fields: usize,
    /// Parked fields written during the pass.
    pub adopted_fields: usize,
}

impl PassReport {
    pub(crate) fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied { skipped_fields } => {
                self.applied += 1;
                self.skipped_fields += skipped_fields;
            }
            ApplyOutcome::Rejected => self.rejected += 1,
            ApplyOutcome::Deferred { .. } => self.deferred += 1,
            ApplyOutcome::Duplicate => self.duplicates += 1,
        }
    }
}

/// Result of ingesting records that may span several groups.
///
/// A failure in one group does not stop the others.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Groups that completed their pass.
    pub completed: Vec<(GroupId, PassReport)>,
    /// Groups whose pass failed.
    pub failed: Vec<(GroupId, SyncError)>,
}

impl IngestReport {
    /// Returns true if every group completed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Report for one group, if it completed.
    pub fn group(&self, group: GroupId) -> Option<&PassReport> {
        self.completed
            .iter()
            .find(|(id, _)| *id == group)
            .map(|(_, report)| report)
    }

    /// Sum over every completed group.
    pub fn totals(&self) -> PassReport {
        let mut total = PassReport::default();
        for (_, report) in &self.completed {
            total.applied += report.applied;
            total.rejected += report.rejected;
            total.deferred += report.deferred;
            total.replayed += report.replayed;
            total.duplicates += report.duplicates;
            total.skipped_fields += report.skipped_fields;
            total.parked_fields += report.parked_fields;
            total.adopted_fields += report.adopted_fields;
        }
        total
    }
}
