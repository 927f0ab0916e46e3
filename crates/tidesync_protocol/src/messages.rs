//! Messages exchanged with the transport collaborator.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::GroupId;
use crate::operation::ChangeRecord;
use crate::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

/// Request to drain pending records of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Group to drain.
    pub group: GroupId,
    /// Only records with a sequence above this are returned.
    pub since: u64,
    /// Maximum number of records.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a new pull request.
    pub fn new(group: GroupId, since: u64, limit: u32) -> Self {
        Self {
            group,
            since,
            limit,
        }
    }
}

/// A batch of encrypted change records for one group.
///
/// Used in both directions: the engine hands outbound batches to the
/// transport, and the transport pushes inbound batches into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Wire protocol version.
    pub version: u16,
    /// Group every record belongs to.
    pub group: GroupId,
    /// Remote tidemark reached by this batch, if the server supplied one.
    pub tidemark: Option<u64>,
    /// Records in arrival order.
    pub records: Vec<ChangeRecord>,
    /// Whether more records are available.
    pub has_more: bool,
}

impl ChangeBatch {
    /// Creates a batch for `group`.
    pub fn new(group: GroupId, records: Vec<ChangeRecord>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            group,
            tidemark: None,
            records,
            has_more: false,
        }
    }

    /// Sets the tidemark.
    #[must_use]
    pub fn with_tidemark(mut self, tidemark: u64) -> Self {
        self.tidemark = Some(tidemark);
        self
    }

    /// Sets the `has_more` flag.
    #[must_use]
    pub fn with_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }

    /// Highest sequence in the batch.
    pub fn max_sequence(&self) -> Option<u64> {
        self.records.iter().map(|r| r.sequence).max()
    }

    /// Sequence a follow-up pull should resume after.
    ///
    /// A partial page resumes after its last record; a complete batch resumes
    /// at the sender's tidemark, which also covers acknowledged records that
    /// were not resent.
    pub fn resume_point(&self) -> Option<u64> {
        if self.has_more {
            self.max_sequence()
        } else {
            self.tidemark.max(self.max_sequence())
        }
    }

    /// Checks that every record belongs to the batch's group.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidStructure`] on the first foreign record.
    pub fn validate(&self) -> ProtocolResult<()> {
        if let Some(foreign) = self.records.iter().find(|r| r.group != self.group) {
            return Err(ProtocolError::invalid_structure(format!(
                "record {} of {} belongs to group {:?}, batch is for {:?}",
                foreign.sequence,
                foreign.target(),
                foreign.group,
                self.group
            )));
        }
        Ok(())
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        self.validate()?;
        to_cbor(self)
    }

    /// Decodes from CBOR and validates version and group membership.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let batch: Self = from_cbor(bytes)?;
        if batch.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: batch.version,
            });
        }
        batch.validate()?;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{DeviceId, EntityRef};
    use crate::operation::OperationKind;

    fn record(group: GroupId, sequence: u64) -> ChangeRecord {
        ChangeRecord::new(
            group,
            EntityRef::new("Person", 1),
            OperationKind::Create,
            DeviceId::from_bytes([3u8; 16]),
        )
        .with_sequence(sequence)
    }

    #[test]
    fn batch_roundtrip() {
        let group = GroupId::from_name("teamA");
        let batch = ChangeBatch::new(group, vec![record(group, 1), record(group, 2)])
            .with_tidemark(77)
            .with_more(true);

        let decoded = ChangeBatch::decode(&batch.encode().unwrap()).unwrap();
        assert_eq!(decoded, batch);
        assert_eq!(decoded.max_sequence(), Some(2));
    }

    #[test]
    fn foreign_record_rejected() {
        let group = GroupId::from_name("teamA");
        let other = GroupId::from_name("teamB");
        let batch = ChangeBatch::new(group, vec![record(group, 1), record(other, 2)]);

        assert!(matches!(
            batch.encode(),
            Err(ProtocolError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn version_mismatch_rejected() {
        let group = GroupId::from_name("teamA");
        let mut batch = ChangeBatch::new(group, Vec::new());
        batch.version = PROTOCOL_VERSION + 1;
        let bytes = to_cbor(&batch).unwrap();

        assert!(matches!(
            ChangeBatch::decode(&bytes),
            Err(ProtocolError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn partial_page_resumes_after_last_record() {
        let group = GroupId::from_name("teamA");
        let page = ChangeBatch::new(group, vec![record(group, 4), record(group, 5)])
            .with_tidemark(9)
            .with_more(true);
        assert_eq!(page.resume_point(), Some(5));

        let last = ChangeBatch::new(group, vec![record(group, 6)]).with_tidemark(9);
        assert_eq!(last.resume_point(), Some(9));

        let untracked = ChangeBatch::new(group, vec![record(group, 3)]);
        assert_eq!(untracked.resume_point(), Some(3));
        assert_eq!(ChangeBatch::new(group, Vec::new()).resume_point(), None);
    }

    #[test]
    fn empty_batch_has_no_max() {
        let batch = ChangeBatch::new(GroupId::from_name("x"), Vec::new());
        assert_eq!(batch.max_sequence(), None);
        assert!(!batch.has_more);
    }
}
