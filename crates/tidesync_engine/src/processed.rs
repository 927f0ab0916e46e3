//! Record ids already settled, kept as per-origin watermarks.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tidesync_protocol::{DeviceId, GroupId, RecordId};

/// Settled sequences of one (group, origin) stream.
///
/// Everything at or below `floor` is settled; `above` holds settled
/// sequences past the first gap. Sequences start at 1.
#[derive(Debug, Default, Clone)]
struct Watermark {
    floor: u64,
    above: BTreeSet<u64>,
}

impl Watermark {
    fn contains(&self, sequence: u64) -> bool {
        sequence <= self.floor || self.above.contains(&sequence)
    }

    fn insert(&mut self, sequence: u64) -> bool {
        if sequence <= self.floor || !self.above.insert(sequence) {
            return false;
        }
        while self.above.remove(&(self.floor + 1)) {
            self.floor += 1;
        }
        true
    }

    fn raise_floor(&mut self, floor: u64) {
        if floor <= self.floor {
            return;
        }
        self.floor = floor;
        self.above = self.above.split_off(&(floor + 1));
        while self.above.remove(&(self.floor + 1)) {
            self.floor += 1;
        }
    }
}

/// Records that were applied, rejected or captured locally.
///
/// Memory stays proportional to the number of gaps per stream, not to the
/// number of records seen: a contiguous run collapses into its watermark.
#[derive(Debug, Default)]
pub(crate) struct ProcessedLog {
    streams: RwLock<HashMap<(GroupId, DeviceId), Watermark>>,
}

impl ProcessedLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, id: &RecordId) -> bool {
        self.streams
            .read()
            .get(&(id.group, id.origin))
            .is_some_and(|mark| mark.contains(id.sequence))
    }

    /// Returns false if `id` was already settled.
    pub(crate) fn insert(&self, id: RecordId) -> bool {
        self.streams
            .write()
            .entry((id.group, id.origin))
            .or_default()
            .insert(id.sequence)
    }

    pub(crate) fn extend(&self, ids: impl IntoIterator<Item = RecordId>) {
        let mut streams = self.streams.write();
        for id in ids {
            streams
                .entry((id.group, id.origin))
                .or_default()
                .insert(id.sequence);
        }
    }

    /// Marks every sequence up to `floor` of one stream as settled.
    pub(crate) fn raise_floor(&self, group: GroupId, origin: DeviceId, floor: u64) {
        self.streams
            .write()
            .entry((group, origin))
            .or_default()
            .raise_floor(floor);
    }

    /// Settled sequences held individually because they sit past a gap.
    pub(crate) fn retained(&self) -> usize {
        self.streams.read().values().map(|mark| mark.above.len()).sum()
    }
}
