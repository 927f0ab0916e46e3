//! Applying remote changes: decrypt, reject, defer or write.

use crate::deferred::DeferredChange;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::parked::ParkedField;
use crate::registry::GroupPass;
use crate::stats::{ApplyOutcome, PassReport};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;
use tidesync_core::{EntityStore, SchemaRegistry};
use tidesync_protocol::{
    ChangeRecord, EntityKey, EntityRef, FieldValue, GroupId, OperationKind, RecordId, TypeTag,
};
use tracing::{debug, info, warn};

/// A received record after field decryption.
#[derive(Debug, Clone)]
pub(crate) struct DecodedChange {
    pub(crate) id: RecordId,
    pub(crate) target: EntityRef,
    pub(crate) operation: OperationKind,
    pub(crate) fields: BTreeMap<String, FieldValue>,
    pub(crate) skipped_fields: usize,
    /// Place in the deferred buffer once it has been deferred.
    pub(crate) arrival: Option<u64>,
}

impl DecodedChange {
    /// Applied creates and deletes settle changes waiting on their object.
    fn releases_waiters(&self, outcome: &ApplyOutcome) -> bool {
        outcome.is_applied()
            && matches!(self.operation, OperationKind::Create | OperationKind::Delete)
    }
}

impl<S: EntityStore, R: SchemaRegistry> SyncEngine<S, R> {
    /// Applies one remote record under `pass`.
    ///
    /// Undecodable fields are dropped and counted; the rest of the record still
    /// applies. A create or delete that applies replays every deferred change
    /// waiting on its object, in this group and in any other group that is not
    /// busy with a pass.
    ///
    /// # Errors
    ///
    /// [`SyncError::WrongGroup`] if the record belongs to another group, or a
    /// store error. Decrypt failures are not errors.
    pub fn apply(&self, pass: &GroupPass, record: ChangeRecord) -> SyncResult<ApplyOutcome> {
        let mut report = PassReport::default();
        self.apply_record(pass, record, &mut report)
    }

    pub(crate) fn apply_record(
        &self,
        pass: &GroupPass,
        record: ChangeRecord,
        report: &mut PassReport,
    ) -> SyncResult<ApplyOutcome> {
        if record.group != pass.group() {
            return Err(SyncError::WrongGroup {
                expected: pass.group(),
                actual: record.group,
            });
        }

        let id = record.id();
        if self.processed.contains(&id) || self.deferred.contains(&id) {
            debug!(record = %record.target(), sequence = id.sequence, "duplicate delivery");
            self.stats.write().duplicates += 1;
            report.record(&ApplyOutcome::Duplicate);
            return Ok(ApplyOutcome::Duplicate);
        }

        let change = self.decode(record);
        let outcome = self.resolve(&change, report)?;
        if change.releases_waiters(&outcome) {
            self.settle(pass, VecDeque::from([change.target]), report)?;
        }
        Ok(outcome)
    }

    fn decode(&self, record: ChangeRecord) -> DecodedChange {
        let id = record.id();
        let target = record.target();
        let mut fields = BTreeMap::new();
        let mut skipped_fields = 0;

        for (name, field) in record.fields {
            match self.cipher.decrypt_value(&field) {
                Ok(value) => {
                    fields.insert(name, value);
                }
                Err(err) => {
                    warn!(record = %target, field = %name, error = %err, "dropping undecodable field");
                    skipped_fields += 1;
                }
            }
        }
        if skipped_fields > 0 {
            self.stats.write().field_decode_failures += skipped_fields as u64;
        }

        DecodedChange {
            id,
            target,
            operation: record.operation,
            fields,
            skipped_fields,
            arrival: None,
        }
    }

    /// Settles one change: delete, reject, defer or write.
    ///
    /// A change for an object that already has an earlier change buffered in
    /// the same group waits behind it, so the two apply in arrival order.
    fn resolve(&self, change: &DecodedChange, report: &mut PassReport) -> SyncResult<ApplyOutcome> {
        let outcome = if change.operation == OperationKind::Delete {
            self.apply_delete(change, report)?
        } else if self.defunct.is_defunct(&change.target) {
            debug!(
                record = %change.target,
                operation = ?change.operation,
                "rejected change for deleted object"
            );
            self.processed.insert(change.id);
            self.stats.write().rejected += 1;
            ApplyOutcome::Rejected
        } else if let Some(waiting_on) = self.earlier_blocker(change) {
            debug!(record = %change.target, waiting_on = %waiting_on, "held behind an earlier change");
            self.defer(change, waiting_on.clone());
            ApplyOutcome::Deferred { waiting_on }
        } else if let Some(waiting_on) = self.missing_dependency(change)? {
            self.defer(change, waiting_on.clone());
            ApplyOutcome::Deferred { waiting_on }
        } else {
            self.write(change, report)?
        };

        report.record(&outcome);
        Ok(outcome)
    }

    /// Dependency of an earlier buffered change to the same object.
    ///
    /// A create never waits behind changes that wait on its own object.
    fn earlier_blocker(&self, change: &DecodedChange) -> Option<EntityRef> {
        self.deferred
            .blocker_for(change.id.group, &change.target)
            .filter(|waiting_on| {
                change.operation != OperationKind::Create || *waiting_on != change.target
            })
    }

    fn write(&self, change: &DecodedChange, report: &mut PassReport) -> SyncResult<ApplyOutcome> {
        let (known, unknown) = self.split_unknown(change);
        self.store.upsert(change.id.group, &change.target, &known)?;
        self.parked.discard(&change.target, known.keys());

        let parked = unknown.len();
        for (property, value) in unknown {
            debug!(record = %change.target, field = %property, "parked field of unknown property");
            self.parked.park(ParkedField {
                target: change.target.clone(),
                property,
                value,
                group: change.id.group,
                record: change.id,
                parked_at: Instant::now(),
            });
        }
        report.parked_fields += parked;

        self.processed.insert(change.id);
        {
            let mut stats = self.stats.write();
            stats.applied += 1;
            stats.parked_fields += parked as u64;
        }
        if change.operation.is_reserved() {
            info!(
                record = %change.target,
                operation = ?change.operation,
                "merge semantics are reserved, applied as a set"
            );
        }
        debug!(record = %change.target, operation = ?change.operation, parked, "applied");
        Ok(ApplyOutcome::Applied {
            skipped_fields: change.skipped_fields,
        })
    }

    /// Splits fields into those the local schema knows and the rest.
    ///
    /// Objects of entities the schema does not register are written as sent.
    fn split_unknown(
        &self,
        change: &DecodedChange,
    ) -> (BTreeMap<String, FieldValue>, Vec<(String, FieldValue)>) {
        let entity = &change.target.entity;
        if !self.schema.has_entity(entity) {
            return (change.fields.clone(), Vec::new());
        }

        let mut known = BTreeMap::new();
        let mut unknown = Vec::new();
        for (name, value) in &change.fields {
            if self.schema.property_type(entity, name).is_some() {
                known.insert(name.clone(), value.clone());
            } else {
                unknown.push((name.clone(), value.clone()));
            }
        }
        (known, unknown)
    }

    fn apply_delete(&self, change: &DecodedChange, report: &mut PassReport) -> SyncResult<ApplyOutcome> {
        self.store.remove(&change.target)?;
        let newly = self.defunct.mark_defunct(change.id.group, &change.target);
        let dropped = self.deferred.drop_targeting(&change.target);
        let unparked = self.parked.drop_object(&change.target);

        self.processed.insert(change.id);
        self.processed.extend(dropped.iter().map(|d| d.change.id));
        {
            let mut stats = self.stats.write();
            stats.applied += 1;
            stats.rejected += dropped.len() as u64;
        }
        report.rejected += dropped.len();

        info!(
            record = %change.target,
            newly_defunct = newly,
            dropped_deferred = dropped.len(),
            dropped_parked = unparked,
            "applied delete"
        );
        Ok(ApplyOutcome::Applied {
            skipped_fields: change.skipped_fields,
        })
    }

    fn defer(&self, change: &DecodedChange, waiting_on: EntityRef) {
        debug!(record = %change.target, waiting_on = %waiting_on, "deferred change");
        if self.deferred.defer(change.clone(), waiting_on) {
            self.stats.write().deferred += 1;
        }

        let buffered = self.deferred.len();
        if buffered > self.config.deferred_warn_threshold {
            warn!(
                buffered,
                threshold = self.config.deferred_warn_threshold,
                "deferred buffer above threshold"
            );
        }
    }

    /// First object the change needs that does not exist locally.
    ///
    /// Anything but a create needs its own object. Every non-null relationship
    /// field needs its target, unless that target was deleted: a deleted
    /// target can never arrive, so the change applies with a dangling reference.
    fn missing_dependency(&self, change: &DecodedChange) -> SyncResult<Option<EntityRef>> {
        if change.operation != OperationKind::Create && !self.store.exists(&change.target)? {
            return Ok(Some(change.target.clone()));
        }

        let entity = &change.target.entity;
        for (name, value) in &change.fields {
            if value.is_null() {
                continue;
            }
            let is_reference = self
                .schema
                .property_type(entity, name)
                .is_some_and(TypeTag::is_entity_reference);
            if !is_reference {
                continue;
            }
            let Some(target_entity) = self.schema.relationship_target(entity, name) else {
                continue;
            };
            let Some(key) = EntityKey::from_value(value) else {
                warn!(record = %change.target, field = %name, "relationship value is not a key");
                continue;
            };

            let dependency = EntityRef::new(target_entity, key);
            if dependency == change.target {
                continue;
            }
            if self.defunct.is_defunct(&dependency) {
                debug!(record = %change.target, reference = %dependency, "reference to deleted object");
                continue;
            }
            if !self.store.exists(&dependency)? {
                return Ok(Some(dependency));
            }
        }
        Ok(None)
    }

    /// Replays changes waiting on `released` here, then in every other group.
    pub(crate) fn settle(
        &self,
        pass: &GroupPass,
        released: VecDeque<EntityRef>,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let released = self.cascade(pass, released, report)?;
        self.release_elsewhere(Some(pass.group()), &released);
        Ok(())
    }

    /// Replays deferred changes of this group waiting on the released objects.
    ///
    /// Replays that create objects extend the queue. The total number of
    /// replays is bounded by the buffer size when the cascade starts. Returns
    /// every object released along the way, visited or not.
    pub(crate) fn cascade(
        &self,
        pass: &GroupPass,
        mut released: VecDeque<EntityRef>,
        report: &mut PassReport,
    ) -> SyncResult<Vec<EntityRef>> {
        let mut visited = Vec::new();
        let mut budget = self.deferred.len();
        while budget > 0 {
            let Some(dependency) = released.pop_front() else {
                return Ok(visited);
            };
            let ready = self.deferred.take_ready(pass.group(), &dependency, budget);
            budget -= ready.len();
            visited.push(dependency);
            self.replay(ready, report, &mut released)?;
        }

        if !released.is_empty() && !self.deferred.is_empty() {
            warn!(
                group = ?pass.group(),
                unvisited = released.len(),
                "deferred cascade reached its replay bound"
            );
        }
        visited.extend(released);
        Ok(visited)
    }

    /// Replays changes of groups other than `current` waiting on `released`.
    ///
    /// Each group runs under its own pass. A group already in a pass is left
    /// alone; the sweep at the end of that pass picks the changes up.
    pub(crate) fn release_elsewhere(&self, current: Option<GroupId>, released: &[EntityRef]) {
        let mut groups = BTreeSet::new();
        for target in released {
            groups.extend(self.deferred.groups_waiting_on(target));
        }

        for group in groups {
            if Some(group) == current {
                continue;
            }
            let Ok(pass) = self.groups.begin_pass(group) else {
                debug!(group = ?group, "group busy, replay left to its pass");
                continue;
            };

            let mut report = PassReport::default();
            let settled = self
                .settle(&pass, released.iter().cloned().collect(), &mut report)
                .and_then(|()| self.adopt_parked(&pass, &mut report));
            match settled {
                Ok(()) => {
                    self.finish_pass(&pass);
                    debug!(group = ?group, replayed = report.replayed, "released waiting changes");
                }
                Err(err) => {
                    warn!(group = ?group, error = %err, "replay of waiting changes failed");
                }
            }
        }
    }

    /// Replays deferred changes of this group whose dependency is settled.
    ///
    /// A dependency is settled once it exists or was deleted.
    pub(crate) fn sweep(&self, pass: &GroupPass, report: &mut PassReport) -> SyncResult<()> {
        let mut resolved = BTreeSet::new();
        for dependency in self.deferred.dependencies_of(pass.group()) {
            if self.defunct.is_defunct(&dependency) || self.store.exists(&dependency)? {
                resolved.insert(dependency);
            }
        }
        if resolved.is_empty() {
            return Ok(());
        }

        let ready = self.deferred.take_resolved(pass.group(), &resolved, usize::MAX);
        let mut released = VecDeque::new();
        self.replay(ready, report, &mut released)?;
        self.settle(pass, released, report)
    }

    fn replay(
        &self,
        ready: Vec<DeferredChange>,
        report: &mut PassReport,
        released: &mut VecDeque<EntityRef>,
    ) -> SyncResult<()> {
        let mut ready = ready.into_iter();
        while let Some(deferred) = ready.next() {
            debug!(
                record = %deferred.change.target,
                waited_on = %deferred.waiting_on,
                "replaying deferred change"
            );
            self.stats.write().replayed += 1;
            report.replayed += 1;

            match self.resolve(&deferred.change, report) {
                Ok(outcome) => {
                    if deferred.change.releases_waiters(&outcome) {
                        released.push_back(deferred.change.target);
                    }
                }
                Err(err) => {
                    // keep what was taken but not settled
                    self.deferred.defer(deferred.change, deferred.waiting_on);
                    for rest in ready.by_ref() {
                        self.deferred.defer(rest.change, rest.waiting_on);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Writes parked values of this group whose property is known now.
    ///
    /// Values for objects that no longer exist are dropped, as are values that
    /// do not fit the type the schema now gives their property.
    pub(crate) fn adopt_parked(&self, pass: &GroupPass, report: &mut PassReport) -> SyncResult<()> {
        let known = self.parked.take_known(pass.group(), |target, property| {
            self.schema.property_type(&target.entity, property).is_some()
        });
        if known.is_empty() {
            return Ok(());
        }

        let mut by_target: BTreeMap<EntityRef, Vec<ParkedField>> = BTreeMap::new();
        for field in known {
            let fits = field.value.is_null()
                || self
                    .schema
                    .property_type(&field.target.entity, &field.property)
                    .is_some_and(|tag| tag.accepts(&field.value));
            if !fits {
                warn!(record = %field.target, field = %field.property, "parked value does not fit its property type");
                continue;
            }
            by_target.entry(field.target.clone()).or_default().push(field);
        }

        let mut adopted = 0;
        let mut pending = by_target.into_iter();
        while let Some((target, fields)) = pending.next() {
            match self.adopt_object(pass.group(), &target, &fields) {
                Ok(count) => adopted += count,
                Err(err) => {
                    for field in fields.into_iter().chain(pending.by_ref().flat_map(|(_, rest)| rest)) {
                        self.parked.park(field);
                    }
                    return Err(err);
                }
            }
        }

        report.adopted_fields += adopted;
        self.stats.write().adopted_fields += adopted as u64;
        if adopted > 0 {
            info!(group = ?pass.group(), adopted, "adopted parked fields");
        }
        Ok(())
    }

    fn adopt_object(&self, group: GroupId, target: &EntityRef, fields: &[ParkedField]) -> SyncResult<usize> {
        if self.defunct.is_defunct(target) || !self.store.exists(target)? {
            debug!(record = %target, fields = fields.len(), "dropped parked fields of missing object");
            return Ok(0);
        }
        let values: BTreeMap<String, FieldValue> = fields
            .iter()
            .map(|field| (field.property.clone(), field.value.clone()))
            .collect();
        self.store.upsert(group, target, &values)?;
        Ok(values.len())
    }
}
