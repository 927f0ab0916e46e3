//! Typed field values and their type tags.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic type of a stored property, carried next to every encrypted payload.
///
/// The tag lets a receiving device rebuild a value with the same semantic type
/// it had on the originating device. Codes are stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TypeTag {
    /// UTF-8 text.
    Text,
    /// Integer, floating point or boolean number.
    Number,
    /// Encoded image bytes.
    Image,
    /// Point in time.
    Date,
    /// Opaque bytes.
    Bytes,
    /// Immutable array.
    Array,
    /// Mutable array.
    MutableArray,
    /// Immutable string-keyed dictionary.
    Dictionary,
    /// Mutable string-keyed dictionary.
    MutableDictionary,
    /// Explicit null.
    Null,
    /// Reference to an entity with a text primary key.
    EntityString,
    /// Reference to an entity with a numeric primary key.
    EntityNumeric,
}

impl TypeTag {
    /// All tags in code order.
    pub const ALL: [TypeTag; 12] = [
        TypeTag::Text,
        TypeTag::Number,
        TypeTag::Image,
        TypeTag::Date,
        TypeTag::Bytes,
        TypeTag::Array,
        TypeTag::MutableArray,
        TypeTag::Dictionary,
        TypeTag::MutableDictionary,
        TypeTag::Null,
        TypeTag::EntityString,
        TypeTag::EntityNumeric,
    ];

    /// Converts to the wire byte.
    pub fn to_code(self) -> u8 {
        match self {
            TypeTag::Text => 1,
            TypeTag::Number => 2,
            TypeTag::Image => 3,
            TypeTag::Date => 4,
            TypeTag::Bytes => 5,
            TypeTag::Array => 6,
            TypeTag::MutableArray => 7,
            TypeTag::Dictionary => 8,
            TypeTag::MutableDictionary => 9,
            TypeTag::Null => 10,
            TypeTag::EntityString => 11,
            TypeTag::EntityNumeric => 12,
        }
    }

    /// Converts from the wire byte.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.to_code() == code)
    }

    /// Returns true if this tag references another entity.
    pub fn is_entity_reference(self) -> bool {
        matches!(self, TypeTag::EntityString | TypeTag::EntityNumeric)
    }

    /// Returns true if a value of this shape may be stored under this tag.
    pub fn accepts(self, value: &FieldValue) -> bool {
        match (self, value) {
            (TypeTag::Null, FieldValue::Null) => true,
            (TypeTag::Text | TypeTag::EntityString, FieldValue::Text(_)) => true,
            (
                TypeTag::Number,
                FieldValue::Integer(_) | FieldValue::Float(_) | FieldValue::Bool(_),
            ) => true,
            (TypeTag::EntityNumeric, FieldValue::Integer(_)) => true,
            (TypeTag::Image | TypeTag::Bytes, FieldValue::Bytes(_)) => true,
            (TypeTag::Date, FieldValue::Date(_)) => true,
            (TypeTag::Array | TypeTag::MutableArray, FieldValue::Array(_)) => true,
            (TypeTag::Dictionary | TypeTag::MutableDictionary, FieldValue::Dictionary(_)) => true,
            _ => false,
        }
    }

    /// Picks a tag for a value when the schema does not know the property.
    pub fn infer(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => TypeTag::Null,
            FieldValue::Bool(_) | FieldValue::Integer(_) | FieldValue::Float(_) => {
                TypeTag::Number
            }
            FieldValue::Text(_) => TypeTag::Text,
            FieldValue::Bytes(_) => TypeTag::Bytes,
            FieldValue::Date(_) => TypeTag::Date,
            FieldValue::Array(_) => TypeTag::Array,
            FieldValue::Dictionary(_) => TypeTag::Dictionary,
        }
    }
}

impl From<TypeTag> for u8 {
    fn from(tag: TypeTag) -> Self {
        tag.to_code()
    }
}

impl TryFrom<u8> for TypeTag {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        TypeTag::from_code(code).ok_or(ProtocolError::UnknownTypeTag(code))
    }
}

/// A plaintext property value.
///
/// Values are serialized to CBOR before encryption. Floats are allowed
/// here, unlike in canonical hashing contexts, because numbers must survive the
/// round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Double precision float.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    /// Array of values.
    Array(Vec<FieldValue>),
    /// String-keyed dictionary.
    Dictionary(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Get this value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Integer(i64::from(n))
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Bytes(b)
    }
}

impl From<()> for FieldValue {
    fn from((): ()) -> Self {
        FieldValue::Null
    }
}
