//! Change records.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{DeviceId, EntityKey, EntityRef, GroupId, RecordId};
use crate::value::TypeTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OperationKind {
    /// A new object was created.
    Create,
    /// One or more values were set.
    Set,
    /// The object was removed from the store.
    Delete,
    /// A value was incremented. Merge semantics are reserved.
    Increment,
    /// A value was decremented. Merge semantics are reserved.
    Decrement,
}

impl OperationKind {
    /// Converts to a numeric code for the wire.
    pub fn to_code(self) -> u8 {
        match self {
            OperationKind::Create => 1,
            OperationKind::Set => 2,
            OperationKind::Delete => 3,
            OperationKind::Increment => 4,
            OperationKind::Decrement => 5,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(OperationKind::Create),
            2 => Some(OperationKind::Set),
            3 => Some(OperationKind::Delete),
            4 => Some(OperationKind::Increment),
            5 => Some(OperationKind::Decrement),
            _ => None,
        }
    }

    /// Returns true for kinds that are captured but not yet merged specially.
    pub fn is_reserved(self) -> bool {
        matches!(self, OperationKind::Increment | OperationKind::Decrement)
    }

    /// Returns true if the kind writes field values.
    pub fn writes_fields(self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl From<OperationKind> for u8 {
    fn from(kind: OperationKind) -> Self {
        kind.to_code()
    }
}

impl TryFrom<u8> for OperationKind {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        OperationKind::from_code(code).ok_or(ProtocolError::UnknownOperation(code))
    }
}

/// An encrypted property value with its semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    /// Semantic type of the plaintext.
    pub tag: TypeTag,
    /// Scheme byte, nonce and ciphertext. Empty for [`TypeTag::Null`].
    pub ciphertext: Vec<u8>,
}

impl EncryptedField {
    /// Creates a field from a tag and its sealed bytes.
    pub fn new(tag: TypeTag, ciphertext: Vec<u8>) -> Self {
        Self { tag, ciphertext }
    }

    /// A null field. Nulls are never encrypted.
    pub fn null() -> Self {
        Self {
            tag: TypeTag::Null,
            ciphertext: Vec::new(),
        }
    }

    /// Returns true if this field carries a null.
    pub fn is_null(&self) -> bool {
        self.tag == TypeTag::Null
    }
}

/// A single field-level mutation to one object.
///
/// Records are immutable once appended to a group queue; the queue assigns
/// `sequence`.
///
/// # Fields
///
/// - `group`: the record group the change belongs to
/// - `entity`/`key`: the object that changed
/// - `operation`: Create, Set, Delete, Increment or Decrement
/// - `fields`: changed property name to encrypted value
/// - `origin`: the device that made the change
/// - `sequence`: position in the origin's queue for `group`
/// - `timestamp_ms`: wall clock at capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Group identifier.
    pub group: GroupId,
    /// Entity name.
    pub entity: String,
    /// Primary key of the object.
    pub key: EntityKey,
    /// Operation kind.
    pub operation: OperationKind,
    /// Changed fields.
    pub fields: BTreeMap<String, EncryptedField>,
    /// Originating device.
    pub origin: DeviceId,
    /// Sequence number within the group queue.
    pub sequence: u64,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl ChangeRecord {
    /// Creates a record with no fields and an unassigned sequence.
    pub fn new(group: GroupId, target: EntityRef, operation: OperationKind, origin: DeviceId) -> Self {
        Self {
            group,
            entity: target.entity,
            key: target.key,
            operation,
            fields: BTreeMap::new(),
            origin,
            sequence: 0,
            timestamp_ms: 0,
        }
    }

    /// Adds an encrypted field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field: EncryptedField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Sets the capture timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Sets the sequence number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Returns the unique id of this record.
    pub fn id(&self) -> RecordId {
        RecordId {
            group: self.group,
            origin: self.origin,
            sequence: self.sequence,
        }
    }

    /// Returns the object this record targets.
    pub fn target(&self) -> EntityRef {
        EntityRef {
            entity: self.entity.clone(),
            key: self.key.clone(),
        }
    }

    /// Total ciphertext bytes carried by this record.
    pub fn payload_size(&self) -> usize {
        self.fields.values().map(|f| f.ciphertext.len()).sum()
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}
