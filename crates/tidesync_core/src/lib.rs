//! # tidesync core
//!
//! Field encryption and the collaborator seams the sync engine talks to.
//!
//! This crate provides:
//! - [`crypto`]: AES-256-GCM encryption of individual field values, tagged
//!   with a scheme byte and bound to the field's type tag
//! - [`SchemaRegistry`]: property type and relationship lookup
//! - [`EntityStore`]: the persistence layer the engine applies changes to
//!
//! In-memory implementations of both seams are included for embedding and
//! tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
mod error;
mod schema;
mod store;

pub use error::{CoreError, CoreResult};
pub use schema::{EntitySchema, MemorySchema, SchemaRegistry};
pub use store::{EntityStore, MemoryStore, StoredObject};
