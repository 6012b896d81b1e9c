//! Typed ID definitions for platform resources.

use crate::define_id;

// =============================================================================
// Tenancy
// =============================================================================

define_id!(ProjectId, "project");

// =============================================================================
// Devices
// =============================================================================

define_id!(InstanceId, "instance");
define_id!(SnapshotId, "snapshot");

// =============================================================================
// Tests
// =============================================================================
