//! Buffer for changes waiting on a missing object.

use crate::applier::DecodedChange;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{Duration, Instant};
use tidesync_protocol::{EntityRef, GroupId, OperationKind, RecordId};

/// A buffered change and the object it waits for.
#[derive(Debug, Clone)]
pub(crate) struct DeferredChange {
    pub(crate) change: DecodedChange,
    pub(crate) waiting_on: EntityRef,
    pub(crate) deferred_at: Instant,
}

/// Diagnostic view of a change that has not resolved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedChange {
    /// Record identity.
    pub id: RecordId,
    /// Object the change writes to.
    pub target: EntityRef,
    /// Operation kind.
    pub operation: OperationKind,
    /// Object that must exist before the change can apply.
    pub waiting_on: EntityRef,
    /// Time spent in the buffer.
    pub age: Duration,
}

#[derive(Debug, Default)]
struct BufferState {
    // keyed by arrival number so iteration is arrival order
    entries: BTreeMap<u64, DeferredChange>,
    ids: HashSet<RecordId>,
    next_arrival: u64,
}

/// Changes held until their dependency is applied locally.
///
/// Shared by every group. Entries keep the arrival number they were first
/// given, so a change that is replayed and deferred again does not lose its
/// place. Nothing is dropped except by a delete of the object it writes to.
#[derive(Debug, Default)]
pub struct DeferredBuffer {
    state: Mutex<BufferState>,
}

impl DeferredBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `change` until `waiting_on` exists.
    ///
    /// Returns false if the same record is already buffered.
    pub(crate) fn defer(&self, mut change: DecodedChange, waiting_on: EntityRef) -> bool {
        let mut state = self.state.lock();
        if state.ids.contains(&change.id) {
            return false;
        }

        let arrival = match change.arrival {
            Some(arrival) => arrival,
            None => {
                let arrival = state.next_arrival;
                state.next_arrival += 1;
                arrival
            }
        };
        change.arrival = Some(arrival);

        state.ids.insert(change.id);
        state.entries.insert(
            arrival,
            DeferredChange {
                change,
                waiting_on,
                deferred_at: Instant::now(),
            },
        );
        true
    }

    /// Returns true if `id` is buffered.
    pub fn contains(&self, id: &RecordId) -> bool {
        self.state.lock().ids.contains(id)
    }

    /// Removes up to `limit` changes of `group` waiting on `dependency`, in arrival order.
    pub(crate) fn take_ready(
        &self,
        group: GroupId,
        dependency: &EntityRef,
        limit: usize,
    ) -> Vec<DeferredChange> {
        self.take_where(limit, |d| {
            d.change.id.group == group && d.waiting_on == *dependency
        })
    }

    /// Removes up to `limit` changes of `group` whose dependency is in `resolved`.
    pub(crate) fn take_resolved(
        &self,
        group: GroupId,
        resolved: &BTreeSet<EntityRef>,
        limit: usize,
    ) -> Vec<DeferredChange> {
        self.take_where(limit, |d| {
            d.change.id.group == group && resolved.contains(&d.waiting_on)
        })
    }

    /// Removes every change that writes to `target`, in any group.
    ///
    /// Changes merely waiting on `target` stay buffered; once it is defunct
    /// they no longer depend on it.
    pub(crate) fn drop_targeting(&self, target: &EntityRef) -> Vec<DeferredChange> {
        self.take_where(usize::MAX, |d| d.change.target == *target)
    }

    /// Dependency of the earliest buffered change of `group` writing to `target`.
    ///
    /// A later change for the same object must wait behind it.
    pub(crate) fn blocker_for(&self, group: GroupId, target: &EntityRef) -> Option<EntityRef> {
        self.state
            .lock()
            .entries
            .values()
            .find(|d| d.change.id.group == group && d.change.target == *target)
            .map(|d| d.waiting_on.clone())
    }

    fn take_where(
        &self,
        limit: usize,
        predicate: impl Fn(&DeferredChange) -> bool,
    ) -> Vec<DeferredChange> {
        let mut state = self.state.lock();
        let arrivals: Vec<u64> = state
            .entries
            .iter()
            .filter(|(_, d)| predicate(d))
            .map(|(arrival, _)| *arrival)
            .take(limit)
            .collect();

        let mut taken = Vec::with_capacity(arrivals.len());
        for arrival in arrivals {
            if let Some(deferred) = state.entries.remove(&arrival) {
                state.ids.remove(&deferred.change.id);
                taken.push(deferred);
            }
        }
        taken
    }

    /// Distinct dependencies that changes of `group` are waiting on.
    pub(crate) fn dependencies_of(&self, group: GroupId) -> BTreeSet<EntityRef> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|d| d.change.id.group == group)
            .map(|d| d.waiting_on.clone())
            .collect()
    }

    /// Groups with at least one change waiting on `dependency`.
    pub(crate) fn groups_waiting_on(&self, dependency: &EntityRef) -> BTreeSet<GroupId> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|d| d.waiting_on == *dependency)
            .map(|d| d.change.id.group)
            .collect()
    }

    /// Every buffered change in arrival order.
    pub fn unresolved(&self) -> Vec<UnresolvedChange> {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .values()
            .map(|d| UnresolvedChange {
                id: d.change.id,
                target: d.change.target.clone(),
                operation: d.change.operation,
                waiting_on: d.waiting_on.clone(),
                age: now.saturating_duration_since(d.deferred_at),
            })
            .collect()
    }

    /// Number of buffered changes.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
