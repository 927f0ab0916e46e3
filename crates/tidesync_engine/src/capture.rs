//! Capturing committed local changes.

use crate::context::GroupContext;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::collections::BTreeMap;
use std::slice;
use std::time::{SystemTime, UNIX_EPOCH};
use tidesync_core::{EntityStore, SchemaRegistry};
use tidesync_protocol::{ChangeRecord, EntityRef, FieldValue, GroupId, OperationKind, RecordId, TypeTag};
use tracing::debug;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

impl<S: EntityStore, R: SchemaRegistry> SyncEngine<S, R> {
    /// Queues a change that was already committed to the local store.
    ///
    /// Each changed field is tagged from the schema, or from its value when the
    /// schema does not know the property, then encrypted. Nulls travel
    /// unencrypted. Increment and decrement are queued as given.
    ///
    /// A local delete also marks the object defunct. A local create or delete
    /// retries deferred changes waiting on the object, in every group that is
    /// not busy with a pass.
    ///
    /// Returns the sequence assigned within `group`.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidChange`] for a delete carrying fields or a set with
    /// none, or a crypto error if a value does not fit its schema type.
    pub fn queue_object(
        &self,
        group: GroupId,
        target: &EntityRef,
        changes: &BTreeMap<String, FieldValue>,
        operation: OperationKind,
    ) -> SyncResult<u64> {
        if !operation.writes_fields() && !changes.is_empty() {
            return Err(SyncError::invalid_change(operation, "delete carries fields"));
        }
        if operation.writes_fields() && operation != OperationKind::Create && changes.is_empty() {
            return Err(SyncError::invalid_change(operation, "no changed fields"));
        }

        let mut record = ChangeRecord::new(group, target.clone(), operation, self.config.device_id)
            .with_timestamp(now_ms());
        for (name, value) in changes {
            let tag = self
                .schema
                .property_type(&target.entity, name)
                .unwrap_or_else(|| TypeTag::infer(value));
            record = record.with_field(name.clone(), self.cipher.encrypt_value(tag, value)?);
        }

        let bytes = record.payload_size();
        let sequence = self.groups.group(group).queue.lock().append(record);
        self.processed.insert(RecordId {
            group,
            origin: self.config.device_id,
            sequence,
        });
        self.stats.write().captured += 1;
        debug!(group = ?group, record = %target, operation = ?operation, sequence, bytes, "captured change");

        match operation {
            OperationKind::Delete => self.local_delete(group, target),
            OperationKind::Create => self.local_create(target),
            _ => {}
        }
        Ok(sequence)
    }

    /// Queues a change into the context's effective group.
    ///
    /// Falls back to the configured default group when the context is empty.
    pub fn capture(
        &self,
        ctx: &GroupContext,
        target: &EntityRef,
        changes: &BTreeMap<String, FieldValue>,
        operation: OperationKind,
    ) -> SyncResult<u64> {
        let group = match ctx.effective_group() {
            Some(group) => {
                if let Some(name) = ctx.effective_group_name() {
                    self.groups.name_group(group, name);
                }
                group
            }
            None => self.groups.register(&self.config.default_group),
        };
        self.queue_object(group, target, changes, operation)
    }

    fn local_delete(&self, group: GroupId, target: &EntityRef) {
        self.defunct.mark_defunct(group, target);
        self.parked.drop_object(target);
        let dropped = self.deferred.drop_targeting(target);
        if !dropped.is_empty() {
            self.processed.extend(dropped.iter().map(|d| d.change.id));
            self.stats.write().rejected += dropped.len() as u64;
            debug!(record = %target, dropped = dropped.len(), "local delete dropped deferred changes");
        }
        // references to a deleted object no longer hold anything back
        self.release_elsewhere(None, slice::from_ref(target));
    }

    fn local_create(&self, target: &EntityRef) {
        self.release_elsewhere(None, slice::from_ref(target));
    }
}
