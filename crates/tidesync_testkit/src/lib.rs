//! # tidesync testkit
//!
//! Test utilities for tidesync.
//!
//! This crate provides:
//! - Proptest strategies for values, tags and local changes
//! - Fixtures: shared key material, a relational schema and simulated devices
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidesync_testkit::prelude::*;
//!
//! #[test]
//! fn converges() {
//!     let (x, y) = (TestDevice::new(1), TestDevice::new(2));
//!     let group = GroupId::from_name("teamA");
//!     x.create(group, &EntityRef::new("Person", 7), fields(&[]));
//!     x.deliver_to(&y, group);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use tidesync_protocol::{EntityRef, FieldValue, GroupId, OperationKind, TypeTag};
}

pub use fixtures::*;
pub use generators::*;
