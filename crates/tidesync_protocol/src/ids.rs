//! Identifiers for groups, devices, entities and records.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Size of a group identifier in bytes.
pub const GROUP_ID_SIZE: usize = 32;

/// Identifier of a record group.
///
/// Derived from the group's human-readable name with SHA-256, so every device
/// computes the same partition id without coordination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId([u8; GROUP_ID_SIZE]);

impl GroupId {
    /// Hashes a group name into its identifier.
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut bytes = [0u8; GROUP_ID_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Creates a group id from raw bytes.
    pub const fn from_bytes(bytes: [u8; GROUP_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; GROUP_ID_SIZE] {
        &self.0
    }

    /// Parses the lowercase or uppercase hex form produced by `Display`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidGroupId`] if the string is not 64 hex digits.
    pub fn from_hex(hex: &str) -> ProtocolResult<Self> {
        if hex.len() != GROUP_ID_SIZE * 2 || !hex.is_ascii() {
            return Err(ProtocolError::InvalidGroupId(hex.to_string()));
        }
        let mut bytes = [0u8; GROUP_ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| ProtocolError::InvalidGroupId(hex.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.short())
    }
}

/// Identifier of the device that originated a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Generates a new random device id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a device id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Primary key of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKey {
    /// Text primary key.
    Text(String),
    /// Numeric primary key.
    Numeric(i64),
}

impl EntityKey {
    /// Reads a relationship value as a key.
    ///
    /// Text becomes a text key, integers become numeric keys; anything else is
    /// not a valid reference.
    pub fn from_value(value: &FieldValue) -> Option<Self> {
        value
            .as_integer()
            .map(EntityKey::Numeric)
            .or_else(|| value.as_text().map(|s| EntityKey::Text(s.to_string())))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Text(s) => f.write_str(s),
            EntityKey::Numeric(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        EntityKey::Text(s.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        EntityKey::Text(s)
    }
}

impl From<i64> for EntityKey {
    fn from(n: i64) -> Self {
        EntityKey::Numeric(n)
    }
}

impl From<i32> for EntityKey {
    fn from(n: i32) -> Self {
        EntityKey::Numeric(i64::from(n))
    }
}

/// An entity name together with a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity (table) name.
    pub entity: String,
    /// Primary key.
    pub key: EntityKey,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(entity: impl Into<String>, key: impl Into<EntityKey>) -> Self {
        Self {
            entity: entity.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.key)
    }
}

/// Globally unique identity of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    /// Group the record belongs to.
    pub group: GroupId,
    /// Device that produced it.
    pub origin: DeviceId,
    /// Sequence within the origin's queue for that group.
    pub sequence: u64,
}
