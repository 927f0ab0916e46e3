//! Test fixtures: key material, schemas and simulated devices.

use std::collections::BTreeMap;
use tidesync_core::crypto::KeyMaterial;
use tidesync_core::{EntityStore, MemorySchema, MemoryStore, StoredObject};
use tidesync_engine::{IngestReport, SyncConfig, SyncEngine};
use tidesync_protocol::{
    ChangeRecord, DeviceId, EntityRef, FieldValue, GroupId, OperationKind, TypeTag,
};

/// Application key shared by every test device.
pub const TEST_APPLICATION_KEY: &str = "tidesync-test-application";
/// Account key shared by every test device.
pub const TEST_ACCOUNT_KEY: &str = "tidesync-test-account";

/// Key material for a device whose id bytes are all `seed`.
pub fn key_material(seed: u8) -> KeyMaterial {
    KeyMaterial::new(TEST_APPLICATION_KEY, TEST_ACCOUNT_KEY, DeviceId::from_bytes([seed; 16]))
}

/// Schema with `Person` pointing at `Department`, which points at `Location`.
pub fn person_schema() -> MemorySchema {
    MemorySchema::new()
        .with_property("Person", "name", TypeTag::Text)
        .with_property("Person", "age", TypeTag::Number)
        .with_property("Person", "photo", TypeTag::Image)
        .with_relationship("Person", "department", "Department", TypeTag::EntityNumeric)
        .with_property("Department", "title", TypeTag::Text)
        .with_relationship("Department", "location", "Location", TypeTag::EntityString)
        .with_property("Location", "locationName", TypeTag::Text)
}

/// Builds a field map from pairs.
pub fn fields(pairs: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

/// A simulated device: an engine over an in-memory store.
///
/// Local writes go to the store first and are then queued, the order a
/// persistence layer would use.
pub struct TestDevice {
    /// The device's engine.
    pub engine: SyncEngine<MemoryStore, MemorySchema>,
}

impl TestDevice {
    /// Creates a device with the [`person_schema`].
    pub fn new(seed: u8) -> Self {
        Self::with_config(seed, |config| config)
    }

    /// Creates a device with an adjusted configuration.
    pub fn with_config(seed: u8, adjust: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        let material = key_material(seed);
        let config = adjust(SyncConfig::for_material(&material));
        Self::build(config, &material, person_schema())
    }

    /// Creates a device whose local schema is `schema`.
    pub fn with_schema(seed: u8, schema: MemorySchema) -> Self {
        let material = key_material(seed);
        Self::build(SyncConfig::for_material(&material), &material, schema)
    }

    fn build(config: SyncConfig, material: &KeyMaterial, schema: MemorySchema) -> Self {
        let engine = SyncEngine::new(config, material, MemoryStore::new(), schema)
            .expect("Failed to create engine");
        Self { engine }
    }

    /// Commits a change locally and queues it.
    pub fn write(
        &self,
        group: GroupId,
        target: &EntityRef,
        operation: OperationKind,
        changes: BTreeMap<String, FieldValue>,
    ) -> u64 {
        let store = self.engine.store();
        match operation {
            OperationKind::Delete => store.remove(target).expect("Failed to delete"),
            _ => store.upsert(group, target, &changes).expect("Failed to write"),
        }
        self.engine
            .queue_object(group, target, &changes, operation)
            .expect("Failed to queue change")
    }

    /// Creates an object locally.
    pub fn create(&self, group: GroupId, target: &EntityRef, changes: BTreeMap<String, FieldValue>) -> u64 {
        self.write(group, target, OperationKind::Create, changes)
    }

    /// Sets fields on an object locally.
    pub fn set(&self, group: GroupId, target: &EntityRef, changes: BTreeMap<String, FieldValue>) -> u64 {
        self.write(group, target, OperationKind::Set, changes)
    }

    /// Deletes an object locally.
    pub fn delete(&self, group: GroupId, target: &EntityRef) -> u64 {
        self.write(group, target, OperationKind::Delete, BTreeMap::new())
    }

    /// Every pending record of `group`.
    pub fn outbox(&self, group: GroupId) -> Vec<ChangeRecord> {
        self.engine.pending_changes(group, 0, Some(u32::MAX))
    }

    /// Reads an object.
    pub fn object(&self, target: &EntityRef) -> Option<StoredObject> {
        self.engine.store().get(target).expect("Failed to read")
    }

    /// Reads one field of an object.
    pub fn field(&self, target: &EntityRef, name: &str) -> Option<FieldValue> {
        self.object(target).and_then(|object| object.fields.get(name).cloned())
    }

    /// Delivers every pending record of `group` from `self` to `other`.
    pub fn deliver_to(&self, other: &TestDevice, group: GroupId) -> IngestReport {
        let bytes = self
            .engine
            .outbound_batch(group, 0)
            .expect("Failed to build batch");
        other
            .engine
            .ingest_batch(&bytes)
            .expect("Failed to ingest batch")
    }
}

/// Installs a test log subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
