//! The sync engine facade.

use crate::config::SyncConfig;
use crate::deferred::{DeferredBuffer, UnresolvedChange};
use crate::defunct::{DefunctEntry, DefunctRegistry};
use crate::error::{SyncError, SyncResult};
use crate::parked::{ParkedField, ParkedFields};
use crate::processed::ProcessedLog;
use crate::registry::{GroupPass, GroupRegistry, PollCandidate};
use crate::stats::{IngestReport, PassReport, SyncStats};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tidesync_core::crypto::{FieldCipher, KeyMaterial};
use tidesync_core::{EntityStore, SchemaRegistry};
use tidesync_protocol::{
    ChangeBatch, ChangeRecord, DeviceId, EncryptedField, EntityRef, FieldValue, GroupId,
    GroupQueue, PullRequest,
};
use tracing::{debug, info, warn};

/// Captures local changes into per-group queues and applies remote ones.
///
/// One explicitly constructed instance owns the group registry, the defunct
/// registry, the deferred buffer and the parked fields. Share it by reference
/// or `Arc`.
///
/// # Concurrency
///
/// Every method takes `&self`. Distinct groups may be ingested from different
/// threads at the same time; a second concurrent pass on the same group fails
/// with [`SyncError::ConcurrencyViolation`].
pub struct SyncEngine<S: EntityStore, R: SchemaRegistry> {
    pub(crate) config: SyncConfig,
    pub(crate) cipher: FieldCipher,
    pub(crate) store: Arc<S>,
    pub(crate) schema: Arc<R>,
    pub(crate) groups: GroupRegistry,
    pub(crate) defunct: DefunctRegistry,
    pub(crate) deferred: DeferredBuffer,
    pub(crate) parked: ParkedFields,
    // remote records already applied or rejected, plus our own captures
    pub(crate) processed: ProcessedLog,
    pub(crate) stats: RwLock<SyncStats>,
}

impl<S: EntityStore, R: SchemaRegistry> SyncEngine<S, R> {
    /// Creates a new sync engine.
    ///
    /// # Errors
    ///
    /// [`SyncError::DeviceMismatch`] if the configured device differs from the
    /// key material's, or a crypto error if key derivation fails.
    pub fn new(config: SyncConfig, material: &KeyMaterial, store: S, schema: R) -> SyncResult<Self> {
        if config.device_id != material.device_id() {
            return Err(SyncError::DeviceMismatch {
                configured: config.device_id,
                material: material.device_id(),
            });
        }

        let cipher = FieldCipher::new(material)?;
        let groups = GroupRegistry::new();
        groups.register(&config.default_group);

        info!(
            device = %config.device_id,
            default_group = %config.default_group,
            scheme = ?cipher.scheme(),
            "sync engine ready"
        );

        Ok(Self {
            config,
            cipher,
            store: Arc::new(store),
            schema: Arc::new(schema),
            groups,
            defunct: DefunctRegistry::new(),
            deferred: DeferredBuffer::new(),
            parked: ParkedFields::new(),
            processed: ProcessedLog::new(),
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Device id stamped on captured records.
    pub fn device_id(&self) -> DeviceId {
        self.config.device_id
    }

    /// Gets the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Gets the schema registry.
    pub fn schema(&self) -> &R {
        &self.schema
    }

    /// Gets the group registry.
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Registers a group by name so diagnostics can show it.
    pub fn register_group(&self, name: &str) -> GroupId {
        self.groups.register(name)
    }

    /// Starts an apply pass on `group`.
    ///
    /// # Errors
    ///
    /// [`SyncError::ConcurrencyViolation`] if one is already in flight.
    pub fn begin_pass(&self, group: GroupId) -> SyncResult<GroupPass> {
        self.groups.begin_pass(group).inspect_err(|err| {
            warn!(group = ?group, error = %err, "refused overlapping pass");
        })
    }

    /// Stores the remote tidemark reached for `group`.
    pub fn record_tidemark(&self, group: GroupId, tidemark: u64) {
        self.groups.record_tidemark(group, tidemark);
        debug!(group = ?group, tidemark, "recorded tidemark");
    }

    /// Groups the transport should poll next, least recently polled first.
    pub fn poll_candidates(&self, limit: usize) -> Vec<PollCandidate> {
        self.groups.poll_candidates(limit)
    }

    /// Pending local records of `group` with a sequence above `since`.
    ///
    /// `limit` defaults to the configured pull batch size.
    pub fn pending_changes(&self, group: GroupId, since: u64, limit: Option<u32>) -> Vec<ChangeRecord> {
        let limit = limit.unwrap_or(self.config.pull_batch_size) as usize;
        self.groups
            .get(group)
            .map(|state| {
                state
                    .queue
                    .lock()
                    .since(since, limit)
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serves a pull request from the local queue.
    ///
    /// The batch tidemark is the highest sequence ever appended to the group.
    pub fn pull(&self, request: &PullRequest) -> ChangeBatch {
        let Some(state) = self.groups.get(request.group) else {
            return ChangeBatch::new(request.group, Vec::new());
        };

        let queue = state.queue.lock();
        let limit = request.limit as usize;
        let mut records: Vec<ChangeRecord> = queue
            .since(request.since, limit.saturating_add(1))
            .into_iter()
            .cloned()
            .collect();
        let has_more = records.len() > limit;
        records.truncate(limit);

        let mut batch = ChangeBatch::new(request.group, records).with_more(has_more);
        let appended = queue.next_sequence().saturating_sub(1);
        if appended > 0 {
            batch = batch.with_tidemark(appended);
        }
        batch
    }

    /// Encodes the next outbound batch of `group` for the transport.
    pub fn outbound_batch(&self, group: GroupId, since: u64) -> SyncResult<Vec<u8>> {
        let batch = self.pull(&PullRequest::new(group, since, self.config.pull_batch_size));
        debug!(
            group = ?group,
            records = batch.records.len(),
            has_more = batch.has_more,
            "built outbound batch"
        );
        Ok(batch.encode()?)
    }

    /// Marks local records up to `up_to` as shipped and compacts the queue.
    pub fn acknowledge(&self, group: GroupId, up_to: u64) {
        if let Some(state) = self.groups.get(group) {
            let mut queue = state.queue.lock();
            queue.acknowledge_up_to(up_to);
            queue.compact();
            debug!(group = ?group, up_to, remaining = queue.len(), "acknowledged");
        }
    }

    /// Counters to persist for `group`'s queue: next sequence and last acknowledged.
    pub fn queue_marks(&self, group: GroupId) -> Option<(u64, u64)> {
        self.groups.get(group).map(|state| {
            let queue = state.queue.lock();
            (queue.next_sequence(), queue.last_acked())
        })
    }

    /// Restores `group`'s queue counters saved by a previous run.
    ///
    /// Sequences keep increasing across restarts, and this device's records
    /// below `next_sequence` count as processed, so their echoes are
    /// duplicates. Returns false, changing nothing, if the group has already
    /// queued records in this run.
    pub fn restore_queue(&self, group: GroupId, next_sequence: u64, last_acked: u64) -> bool {
        let state = self.groups.group(group);
        let mut queue = state.queue.lock();
        if queue.next_sequence() > 1 {
            warn!(group = ?group, next = queue.next_sequence(), "queue already in use, not restored");
            return false;
        }

        *queue = GroupQueue::from_state(next_sequence, last_acked);
        let captured = queue.next_sequence().saturating_sub(1);
        self.processed.raise_floor(group, self.config.device_id, captured);
        info!(group = ?group, next_sequence = queue.next_sequence(), last_acked = queue.last_acked(), "restored queue");
        true
    }

    /// Decrypts a single field, e.g. to inspect a queued record.
    pub fn decrypt_value(&self, field: &EncryptedField) -> SyncResult<FieldValue> {
        Ok(self.cipher.decrypt_value(field)?)
    }

    /// Applies remote records.
    ///
    /// Records are grouped by their group id, keeping arrival order within each
    /// group, and each group runs under its own pass.
    pub fn ingest(&self, records: Vec<ChangeRecord>) -> IngestReport {
        let mut order: Vec<GroupId> = Vec::new();
        let mut by_group: HashMap<GroupId, Vec<ChangeRecord>> = HashMap::new();
        for record in records {
            let group = record.group;
            by_group
                .entry(group)
                .or_insert_with(|| {
                    order.push(group);
                    Vec::new()
                })
                .push(record);
        }

        let mut report = IngestReport::default();
        for group in order {
            let records = by_group.remove(&group).unwrap_or_default();
            match self.ingest_group(group, records) {
                Ok(pass_report) => report.completed.push((group, pass_report)),
                Err(err) => {
                    warn!(group = ?group, error = %err, "group pass failed");
                    report.failed.push((group, err));
                }
            }
        }
        report
    }

    /// Decodes a wire batch and applies it.
    ///
    /// The resume point of the batch is recorded as the group's tidemark, only
    /// if the group's pass completed. A page with more to follow resumes after
    /// its last record rather than at the sender's tidemark.
    pub fn ingest_batch(&self, bytes: &[u8]) -> SyncResult<IngestReport> {
        let batch = ChangeBatch::decode(bytes)?;
        let group = batch.group;
        let resume = batch.resume_point();

        let report = self.ingest(batch.records);
        if let Some(tidemark) = resume {
            if report.failed.iter().all(|(id, _)| *id != group) {
                self.record_tidemark(group, tidemark);
            }
        }
        Ok(report)
    }

    fn ingest_group(&self, group: GroupId, records: Vec<ChangeRecord>) -> SyncResult<PassReport> {
        let pass = self.begin_pass(group)?;
        let mut report = PassReport::default();
        let count = records.len();

        for record in records {
            self.apply_record(&pass, record, &mut report)?;
        }
        // picks up dependencies created outside this pass, e.g. by other groups
        self.sweep(&pass, &mut report)?;
        self.adopt_parked(&pass, &mut report)?;

        self.finish_pass(&pass);
        info!(
            group = ?group,
            records = count,
            applied = report.applied,
            rejected = report.rejected,
            deferred = report.deferred,
            replayed = report.replayed,
            duplicates = report.duplicates,
            parked = report.parked_fields,
            "pass complete"
        );
        Ok(report)
    }

    /// Retries deferred changes of `group` whose dependency now exists or was
    /// deleted, and writes parked fields whose property is known now.
    pub fn resolve_deferred(&self, group: GroupId) -> SyncResult<PassReport> {
        let pass = self.begin_pass(group)?;
        let mut report = PassReport::default();
        self.sweep(&pass, &mut report)?;
        self.adopt_parked(&pass, &mut report)?;
        self.finish_pass(&pass);
        Ok(report)
    }

    /// Writes parked fields whose property the schema has learned since.
    ///
    /// Call after registering new properties. Groups busy with a pass are
    /// skipped; their pass adopts the fields when it ends. Returns the number
    /// of fields written.
    pub fn replay_parked_fields(&self) -> SyncResult<usize> {
        let mut adopted = 0;
        for group in self.parked.groups() {
            let Ok(pass) = self.groups.begin_pass(group) else {
                debug!(group = ?group, "group busy, parked fields left to its pass");
                continue;
            };
            let mut report = PassReport::default();
            self.adopt_parked(&pass, &mut report)?;
            self.finish_pass(&pass);
            adopted += report.adopted_fields;
        }
        Ok(adopted)
    }

    pub(crate) fn finish_pass(&self, pass: &GroupPass) {
        let mut stats = self.stats.write();
        stats.passes += 1;
        stats.last_pass = Some(Instant::now());
        debug!(group = ?pass.group(), elapsed = ?pass.started().elapsed(), "pass finished");
    }

    /// Changes still waiting on a dependency, in arrival order.
    pub fn unresolved_deferred(&self) -> Vec<UnresolvedChange> {
        self.deferred.unresolved()
    }

    /// Values held for properties the local schema does not know yet.
    pub fn parked_fields(&self) -> Vec<ParkedField> {
        self.parked.snapshot()
    }

    /// Every deleted object, oldest first.
    pub fn defunct_entries(&self) -> Vec<DefunctEntry> {
        self.defunct.entries()
    }

    /// Returns true if `target` was deleted.
    pub fn is_defunct(&self, target: &EntityRef) -> bool {
        self.defunct.is_defunct(target)
    }
}

impl<S: EntityStore, R: SchemaRegistry> std::fmt::Debug for SyncEngine<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("cipher", &self.cipher)
            .field("groups", &self.groups.len())
            .field("defunct", &self.defunct.len())
            .field("deferred", &self.deferred.len())
            .field("parked", &self.parked.len())
            .field("processed_gaps", &self.processed.retained())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tidesync_core::{MemorySchema, MemoryStore};
    use tidesync_protocol::{OperationKind, TypeTag};

    fn engine() -> SyncEngine<MemoryStore, MemorySchema> {
        let material = KeyMaterial::new("app", "acct", DeviceId::from_bytes([1u8; 16]));
        let schema = MemorySchema::new().with_property("Note", "body", TypeTag::Text);
        SyncEngine::new(
            SyncConfig::for_material(&material).with_pull_batch_size(2),
            &material,
            MemoryStore::new(),
            schema,
        )
        .unwrap()
    }

    fn body(text: &str) -> BTreeMap<String, FieldValue> {
        BTreeMap::from([("body".to_string(), FieldValue::from(text))])
    }

    #[test]
    fn device_mismatch_is_rejected() {
        let material = KeyMaterial::new("app", "acct", DeviceId::from_bytes([1u8; 16]));
        let config = SyncConfig::new(DeviceId::from_bytes([2u8; 16]));
        let err = SyncEngine::new(config, &material, MemoryStore::new(), MemorySchema::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::DeviceMismatch { .. }));
    }

    #[test]
    fn default_group_is_registered() {
        let engine = engine();
        let default = GroupId::from_name("default");
        assert_eq!(engine.groups().name_of(default).as_deref(), Some("default"));
    }

    #[test]
    fn pull_pages_with_has_more() {
        let engine = engine();
        let group = engine.register_group("notes");
        for i in 0..3 {
            engine
                .queue_object(
                    group,
                    &EntityRef::new("Note", i),
                    &body("x"),
                    OperationKind::Create,
                )
                .unwrap();
        }

        let first = engine.pull(&PullRequest::new(group, 0, 2));
        assert_eq!(first.records.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.tidemark, Some(3));

        let second = engine.pull(&PullRequest::new(group, 2, 2));
        assert_eq!(second.records.len(), 1);
        assert!(!second.has_more);
    }

    #[test]
    fn pending_uses_default_limit() {
        let engine = engine();
        let group = engine.register_group("notes");
        for i in 0..5 {
            engine
                .queue_object(group, &EntityRef::new("Note", i), &body("y"), OperationKind::Create)
                .unwrap();
        }
        assert_eq!(engine.pending_changes(group, 0, None).len(), 2);
        assert_eq!(engine.pending_changes(group, 0, Some(10)).len(), 5);
        assert!(engine.pending_changes(GroupId::from_name("unknown"), 0, None).is_empty());
    }

    #[test]
    fn acknowledge_compacts() {
        let engine = engine();
        let group = engine.register_group("notes");
        for i in 0..3 {
            engine
                .queue_object(group, &EntityRef::new("Note", i), &body("z"), OperationKind::Create)
                .unwrap();
        }

        engine.acknowledge(group, 2);
        let pending = engine.pending_changes(group, 0, Some(10));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sequence, 3);
    }

    #[test]
    fn outbound_batch_decodes() {
        let engine = engine();
        let group = engine.register_group("notes");
        engine
            .queue_object(group, &EntityRef::new("Note", 1), &body("hello"), OperationKind::Create)
            .unwrap();

        let bytes = engine.outbound_batch(group, 0).unwrap();
        let batch = ChangeBatch::decode(&bytes).unwrap();
        assert_eq!(batch.group, group);
        assert_eq!(batch.records.len(), 1);

        assert_eq!(batch.version, tidesync_protocol::PROTOCOL_VERSION);

        let field = &batch.records[0].fields["body"];
        assert_eq!(engine.decrypt_value(field).unwrap(), FieldValue::from("hello"));
    }

    #[test]
    fn restored_queue_continues_sequences() {
        let first = engine();
        let group = first.register_group("notes");
        for i in 0..3 {
            first
                .queue_object(group, &EntityRef::new("Note", i), &body("v1"), OperationKind::Create)
                .unwrap();
        }
        first.acknowledge(group, 2);
        let echo = first.pending_changes(group, 0, Some(10)).remove(0);
        assert_eq!(first.queue_marks(group), Some((4, 2)));

        let restarted = engine();
        assert!(restarted.restore_queue(group, 4, 2));
        assert_eq!(restarted.queue_marks(group), Some((4, 2)));
        let next = restarted
            .queue_object(group, &EntityRef::new("Note", 9), &body("v2"), OperationKind::Create)
            .unwrap();
        assert_eq!(next, 4);
        assert!(!restarted.restore_queue(group, 1, 0));

        // our own record from before the restart comes back from the server
        let report = restarted.ingest(vec![echo]);
        assert_eq!(report.totals().duplicates, 1);
        assert!(!restarted.store().exists(&EntityRef::new("Note", 2)).unwrap());
    }

    #[test]
    fn empty_ingest_reports_nothing() {
        let engine = engine();
        let report = engine.ingest(Vec::new());
        assert!(report.is_success());
        assert!(report.completed.is_empty());
        assert_eq!(engine.stats().passes, 0);
    }
}
