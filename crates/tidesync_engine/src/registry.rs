//! Registry of record groups and their in-flight passes.

use crate::context::GroupContext;
use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tidesync_protocol::{GroupId, GroupQueue, PullRequest};

/// State of one record group.
#[derive(Debug)]
pub(crate) struct RecordGroup {
    id: GroupId,
    name: RwLock<Option<String>>,
    pub(crate) queue: Mutex<GroupQueue>,
    in_flight: AtomicBool,
    tidemark: Mutex<Option<u64>>,
    last_polled: Mutex<Option<Instant>>,
}

impl RecordGroup {
    fn new(id: GroupId) -> Self {
        Self {
            id,
            name: RwLock::new(None),
            queue: Mutex::new(GroupQueue::new()),
            in_flight: AtomicBool::new(false),
            tidemark: Mutex::new(None),
            last_polled: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Exclusive right to apply changes to one group.
///
/// Released when dropped, including on early return or unwinding, so an
/// aborted pass never leaves its group locked.
#[derive(Debug)]
pub struct GroupPass {
    group: Arc<RecordGroup>,
    started: Instant,
}

impl GroupPass {
    /// The group this pass holds.
    pub fn group(&self) -> GroupId {
        self.group.id
    }

    /// A context attributing nested captures to this pass's group.
    pub fn context(&self) -> GroupContext {
        GroupContext::with_group(self.group.id)
    }

    /// When the pass started.
    pub fn started(&self) -> Instant {
        self.started
    }
}

impl Drop for GroupPass {
    fn drop(&mut self) {
        self.group.in_flight.store(false, Ordering::SeqCst);
    }
}

/// A group the transport should pull next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCandidate {
    /// Group id.
    pub group: GroupId,
    /// Human-readable name, if known locally.
    pub name: Option<String>,
    /// Last remote tidemark recorded for the group.
    pub tidemark: Option<u64>,
    /// When the group was last polled; `None` if never.
    pub last_polled: Option<Instant>,
}

impl PollCandidate {
    /// Builds the pull request that resumes from the recorded tidemark.
    pub fn pull_request(&self, limit: u32) -> PullRequest {
        PullRequest::new(self.group, self.tidemark.unwrap_or(0), limit)
    }
}

/// All record groups known to one engine.
///
/// Groups are created lazily on first reference and never removed.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<GroupId, Arc<RecordGroup>>>,
}

impl GroupRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the group, creating it if needed.
    pub(crate) fn group(&self, id: GroupId) -> Arc<RecordGroup> {
        if let Some(group) = self.groups.read().get(&id) {
            return Arc::clone(group);
        }
        let mut groups = self.groups.write();
        Arc::clone(
            groups
                .entry(id)
                .or_insert_with(|| Arc::new(RecordGroup::new(id))),
        )
    }

    /// Returns the group if it exists.
    pub(crate) fn get(&self, id: GroupId) -> Option<Arc<RecordGroup>> {
        self.groups.read().get(&id).cloned()
    }

    /// Registers a group by name and returns its id.
    pub fn register(&self, name: &str) -> GroupId {
        let id = GroupId::from_name(name);
        self.name_group(id, name);
        id
    }

    pub(crate) fn name_group(&self, id: GroupId, name: &str) {
        let group = self.group(id);
        let mut slot = group.name.write();
        if slot.is_none() {
            *slot = Some(name.to_string());
        }
    }

    /// Returns the name of a group, if known.
    pub fn name_of(&self, id: GroupId) -> Option<String> {
        self.get(id).and_then(|group| group.name())
    }

    /// Ids of every known group.
    pub fn ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.groups.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of known groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Returns true if no group has been referenced yet.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Starts a pass on `id`.
    ///
    /// # Errors
    ///
    /// [`SyncError::ConcurrencyViolation`] if a pass is already in flight for
    /// that group. Other groups are unaffected.
    pub fn begin_pass(&self, id: GroupId) -> SyncResult<GroupPass> {
        let group = self.group(id);
        if group
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::ConcurrencyViolation { group: id });
        }
        Ok(GroupPass {
            group,
            started: Instant::now(),
        })
    }

    /// Returns true if `id` has a pass in flight.
    pub fn is_in_flight(&self, id: GroupId) -> bool {
        self.get(id).is_some_and(|group| group.is_in_flight())
    }

    /// Stores the remote tidemark of a group and stamps it as polled.
    pub fn record_tidemark(&self, id: GroupId, tidemark: u64) {
        let group = self.group(id);
        {
            let mut slot = group.tidemark.lock();
            *slot = Some(slot.map_or(tidemark, |current| current.max(tidemark)));
        }
        *group.last_polled.lock() = Some(Instant::now());
    }

    /// Returns the last recorded tidemark of a group.
    pub fn tidemark(&self, id: GroupId) -> Option<u64> {
        self.get(id).and_then(|group| *group.tidemark.lock())
    }

    /// Groups ordered for polling: never polled first, then least recently polled.
    pub fn poll_candidates(&self, limit: usize) -> Vec<PollCandidate> {
        let mut candidates: Vec<PollCandidate> = self
            .groups
            .read()
            .values()
            .map(|group| PollCandidate {
                group: group.id,
                name: group.name(),
                tidemark: *group.tidemark.lock(),
                last_polled: *group.last_polled.lock(),
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.last_polled
                .cmp(&b.last_polled)
                .then_with(|| a.group.cmp(&b.group))
        });
        candidates.truncate(limit);
        candidates
    }
}
