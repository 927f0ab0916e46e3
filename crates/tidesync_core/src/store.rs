//! Persistence seam.

use crate::error::CoreResult;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tidesync_protocol::{EntityRef, FieldValue, GroupId};

/// A stored object as seen by the sync engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredObject {
    /// Record group the object is visible in, if assigned.
    pub group: Option<GroupId>,
    /// Property values.
    pub fields: BTreeMap<String, FieldValue>,
}

impl StoredObject {
    /// Returns a property value.
    pub fn get(&self, property: &str) -> Option<&FieldValue> {
        self.fields.get(property)
    }
}

/// The persistence layer the engine applies resolved changes to.
///
/// Implementations must not call back into the engine's capture path for
/// writes made through this trait; those writes originate remotely and must
/// not be queued again.
///
/// # Invariants
///
/// - `upsert` creates the object if it does not exist
/// - `upsert` assigns `group` only if the object has no group yet
/// - `remove` of a missing object succeeds
pub trait EntityStore: Send + Sync {
    /// Returns true if the object exists locally.
    fn exists(&self, target: &EntityRef) -> CoreResult<bool>;

    /// Reads an object.
    fn get(&self, target: &EntityRef) -> CoreResult<Option<StoredObject>>;

    /// Creates the object if needed and writes `fields` onto it.
    fn upsert(
        &self,
        group: GroupId,
        target: &EntityRef,
        fields: &BTreeMap<String, FieldValue>,
    ) -> CoreResult<()>;

    /// Removes the object.
    fn remove(&self, target: &EntityRef) -> CoreResult<()>;
}

/// An in-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<EntityRef, StoredObject>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Snapshot of every object, for convergence checks.
    pub fn snapshot(&self) -> BTreeMap<EntityRef, StoredObject> {
        self.objects
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl EntityStore for MemoryStore {
    fn exists(&self, target: &EntityRef) -> CoreResult<bool> {
        Ok(self.objects.read().contains_key(target))
    }

    fn get(&self, target: &EntityRef) -> CoreResult<Option<StoredObject>> {
        Ok(self.objects.read().get(target).cloned())
    }

    fn upsert(
        &self,
        group: GroupId,
        target: &EntityRef,
        fields: &BTreeMap<String, FieldValue>,
    ) -> CoreResult<()> {
        let mut objects = self.objects.write();
        let object = objects.entry(target.clone()).or_default();
        if object.group.is_none() {
            object.group = Some(group);
        }
        for (name, value) in fields {
            object.fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn remove(&self, target: &EntityRef) -> CoreResult<()> {
        self.objects.write().remove(target);
        Ok(())
    }
}
