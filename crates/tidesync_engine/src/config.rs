//! Configuration for the sync engine.

use tidesync_core::crypto::KeyMaterial;
use tidesync_protocol::DeviceId;

/// Name of the group used when no effective group is set.
pub const DEFAULT_GROUP: &str = "default";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID stamped on every captured record. Must match the key material.
    pub device_id: DeviceId,
    /// Group that captures fall back to when the context names none.
    pub default_group: String,
    /// Maximum number of records served per pull.
    pub pull_batch_size: u32,
    /// Deferred buffer size above which a warning is logged.
    pub deferred_warn_threshold: usize,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            default_group: DEFAULT_GROUP.to_string(),
            pull_batch_size: 200,
            deferred_warn_threshold: 1_000,
        }
    }

    /// Creates a configuration for the device named in `material`.
    pub fn for_material(material: &KeyMaterial) -> Self {
        Self::new(material.device_id())
    }

    /// Sets the default group name.
    pub fn with_default_group(mut self, name: impl Into<String>) -> Self {
        self.default_group = name.into();
        self
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the deferred warning threshold.
    pub fn with_deferred_warn_threshold(mut self, threshold: usize) -> Self {
        self.deferred_warn_threshold = threshold;
        self
    }
}

impl Default for SyncConfig {
    /// A configuration for a freshly generated device id.
    fn default() -> Self {
        Self::new(DeviceId::new())
    }
}
