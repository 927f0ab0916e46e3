//! Per-group outbound change queue.

use crate::operation::ChangeRecord;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
struct QueueEntry {
    record: ChangeRecord,
    acknowledged: bool,
}

impl QueueEntry {
    fn new(record: ChangeRecord) -> Self {
        Self {
            record,
            acknowledged: false,
        }
    }
}

/// The ordered outbound queue of one record group.
///
/// # Invariants
///
/// - Records are in append order and sequences strictly increase
/// - Only records whose local commit already succeeded are appended
/// - Acknowledged records can be compacted
#[derive(Debug)]
pub struct GroupQueue {
    entries: VecDeque<QueueEntry>,
    next_sequence: u64,
    last_acked: u64,
}

impl GroupQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_sequence: 1,
            last_acked: 0,
        }
    }

    /// Restores counters from persisted state.
    pub fn from_state(next_sequence: u64, last_acked: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            next_sequence: next_sequence.max(1),
            last_acked,
        }
    }

    /// Appends a record, assigning it the next sequence.
    ///
    /// Returns the assigned sequence.
    pub fn append(&mut self, mut record: ChangeRecord) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        record.sequence = sequence;
        self.entries.push_back(QueueEntry::new(record));
        sequence
    }

    /// Returns pending (unacknowledged) records.
    pub fn pending(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.entries
            .iter()
            .filter(|e| !e.acknowledged)
            .map(|e| &e.record)
    }

    /// Returns pending records with a sequence above `since`, up to `limit`.
    pub fn since(&self, since: u64, limit: usize) -> Vec<&ChangeRecord> {
        self.pending()
            .filter(|r| r.sequence > since)
            .take(limit)
            .collect()
    }

    /// Returns the number of pending records.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.acknowledged).count()
    }

    /// Acknowledges records up to and including `sequence`.
    pub fn acknowledge_up_to(&mut self, sequence: u64) {
        for entry in &mut self.entries {
            if entry.record.sequence <= sequence {
                entry.acknowledged = true;
            }
        }
        self.last_acked = self.last_acked.max(sequence);
    }

    /// Drops the acknowledged prefix.
    pub fn compact(&mut self) {
        while let Some(entry) = self.entries.front() {
            if entry.acknowledged {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the last acknowledged sequence.
    pub fn last_acked(&self) -> u64 {
        self.last_acked
    }

    /// Returns the sequence the next append will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Returns the total number of entries, acknowledged or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GroupQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{DeviceId, EntityRef, GroupId};
    use crate::operation::OperationKind;

    fn make_record(key: i64) -> ChangeRecord {
        ChangeRecord::new(
            GroupId::from_name("g"),
            EntityRef::new("Person", key),
            OperationKind::Set,
            DeviceId::from_bytes([2u8; 16]),
        )
    }

    #[test]
    fn append_assigns_sequence() {
        let mut queue = GroupQueue::new();
        assert_eq!(queue.append(make_record(1)), 1);
        assert_eq!(queue.append(make_record(2)), 2);
        assert_eq!(queue.append(make_record(3)), 3);
        assert_eq!(queue.pending().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn since_filters_and_limits() {
        let mut queue = GroupQueue::new();
        for i in 0..10 {
            queue.append(make_record(i));
        }

        let batch = queue.since(4, 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].sequence, 5);
        assert_eq!(batch[2].sequence, 7);
        assert!(queue.since(10, 5).is_empty());
    }

    #[test]
    fn acknowledge_and_compact() {
        let mut queue = GroupQueue::new();
        queue.append(make_record(1));
        queue.append(make_record(2));
        queue.append(make_record(3));

        queue.acknowledge_up_to(2);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.last_acked(), 2);
        assert_eq!(queue.len(), 3);

        queue.compact();
        assert_eq!(queue.len(), 1);

        // acknowledging backwards does not move the watermark
        queue.acknowledge_up_to(1);
        assert_eq!(queue.last_acked(), 2);
    }

    #[test]
    fn from_state_continues_numbering() {
        let mut queue = GroupQueue::from_state(40, 39);
        assert_eq!(queue.append(make_record(1)), 40);
        assert_eq!(queue.last_acked(), 39);
        assert_eq!(GroupQueue::from_state(0, 0).next_sequence(), 1);
    }
}
