//! # tidesync engine
//!
//! Change capture and reconciliation for record-group sync.
//!
//! This crate provides:
//! - Effective group context and the registry of record groups
//! - Change capture into per-group queues, with field encryption
//! - The defunct registry: deleted objects never come back
//! - The deferred buffer: changes wait for the objects they depend on
//! - Parked fields: values for properties the local schema does not know yet
//! - Pull and push surfaces for an external transport
//!
//! ## Architecture
//!
//! Local commits flow into [`SyncEngine::queue_object`] (or
//! [`SyncEngine::capture`] with a [`GroupContext`]), which encrypts every
//! changed field and appends a record to the group's queue. The transport
//! drains queues with [`SyncEngine::pull`] and hands remote records to
//! [`SyncEngine::ingest`]. Each group is applied under its own
//! [`GroupPass`]; groups proceed independently.
//!
//! A received record is decrypted field by field, then:
//!
//! ```text
//! Received -> Decrypted -> Rejected (object deleted)
//!                       -> Deferred -> Applied (once the dependency exists)
//!                       -> Applied
//! ```
//!
//! ## Key Invariants
//!
//! - Delete wins: a deleted object is never recreated by a late change
//! - Re-delivering a record is a no-op
//! - Within a group, records apply in arrival order except where deferred
//! - A deferred change applies at most once, after its dependency
//! - At most one apply pass per group at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod capture;
mod config;
mod context;
mod deferred;
mod defunct;
mod engine;
mod error;
mod parked;
mod processed;
mod registry;
mod stats;

pub use config::{SyncConfig, DEFAULT_GROUP};
pub use context::GroupContext;
pub use deferred::{DeferredBuffer, UnresolvedChange};
pub use defunct::{DefunctEntry, DefunctRegistry};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use parked::ParkedField;
pub use registry::{GroupPass, GroupRegistry, PollCandidate};
pub use stats::{ApplyOutcome, IngestReport, PassReport, SyncStats};
