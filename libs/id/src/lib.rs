//! # vdev-id
//!
//! Typed identifiers for resources owned by the vdev platform.
//!
//! ## Design Principles
//!
//! - IDs are assigned by the platform; the client never mints them for
//!   resources that already exist
//! - IDs are typed so an instance ID cannot be passed where a snapshot ID
//!   is expected
//! - The wire form is the bare hyphenated UUID the platform returns
//!
//! Examples:
//! - instance: `6f1c1b9e-3c0a-4f0e-9a55-2b1f5d3c8e71`
//! - project:  `0b5e7d52-8d47-4e3d-b1f3-0d6f0bd6e3a9`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
