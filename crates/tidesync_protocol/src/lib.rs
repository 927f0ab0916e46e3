//! # tidesync protocol
//!
//! Change record model and wire codec for tidesync.
//!
//! This crate provides:
//! - [`ChangeRecord`] for field-level replication records
//! - [`TypeTag`] and [`FieldValue`] for typed field payloads
//! - [`GroupId`] hashing of record group names
//! - [`GroupQueue`] for per-group outbound ordering
//! - Pull/push batch messages and their CBOR encoding
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod ids;
mod messages;
mod operation;
mod queue;
mod value;

pub use codec::{from_cbor, to_cbor};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{DeviceId, EntityKey, EntityRef, GroupId, RecordId};
pub use messages::{ChangeBatch, PullRequest};
pub use operation::{ChangeRecord, EncryptedField, OperationKind};
pub use queue::GroupQueue;
pub use value::{FieldValue, TypeTag};

/// Wire protocol version carried in every [`ChangeBatch`].
pub const PROTOCOL_VERSION: u16 = 1;
