//! Tombstones for deleted objects.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;
use tidesync_protocol::{EntityRef, GroupId};

/// A deleted object that must not come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefunctEntry {
    /// The deleted object.
    pub target: EntityRef,
    /// Group the delete was seen in.
    pub group: GroupId,
    /// When the delete was first seen locally.
    pub marked_at: Instant,
}

/// Registry of deleted objects.
///
/// Delete wins: once an object is marked, later creates and sets for it are
/// rejected. Entries are never removed.
#[derive(Debug, Default)]
pub struct DefunctRegistry {
    entries: RwLock<HashMap<EntityRef, DefunctEntry>>,
}

impl DefunctRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `target` deleted. Returns false if it already was.
    pub fn mark_defunct(&self, group: GroupId, target: &EntityRef) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(target) {
            return false;
        }
        entries.insert(
            target.clone(),
            DefunctEntry {
                target: target.clone(),
                group,
                marked_at: Instant::now(),
            },
        );
        true
    }

    /// Returns true if `target` was deleted.
    pub fn is_defunct(&self, target: &EntityRef) -> bool {
        self.entries.read().contains_key(target)
    }

    /// Snapshot of every entry, oldest first.
    pub fn entries(&self) -> Vec<DefunctEntry> {
        let mut entries: Vec<DefunctEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| {
            a.marked_at
                .cmp(&b.marked_at)
                .then_with(|| a.target.cmp(&b.target))
        });
        entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing has been deleted.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
