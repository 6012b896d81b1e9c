//! # vdev-client
//!
//! Async client handles for virtual devices whose state lives on the vdev
//! platform.
//!
//! The platform owns every instance; this crate only observes it. An
//! [`Instance`] keeps a cached snapshot of what the platform last reported,
//! polls for changes only while someone is watching, and keeps at most one
//! hypervisor channel and one agent channel open to the device.
//!
//! ## Layout
//!
//! - [`accessor`]: request/response calls against the REST API
//! - [`tracker`]: cached state, change detection and the lazy poller
//! - [`waiter`]: block until a predicate over the cached state holds
//! - [`channel`]: hypervisor and agent channels, one live per kind
//! - [`instance`], [`project`], [`client`]: the public handles
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use vdev_client::{Client, ClientConfig, CreateInstance, InstanceStatus};
//!
//! # async fn run() -> vdev_client::Result<()> {
//! let client = Client::new(ClientConfig::from_env()?)?;
//! let project = client.projects().await?.remove(0);
//!
//! let instance = project
//!     .create_instance(CreateInstance::new("ci-device", "pixel-7"))
//!     .await?;
//! instance
//!     .wait_for_state_timeout(InstanceStatus::On, Duration::from_secs(300))
//!     .await?;
//!
//! println!("{}", instance.console_log().await?);
//! instance.close().await;
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod instance;
pub mod project;
pub mod snapshot;
pub mod state;
pub mod tracker;
pub mod waiter;

pub use accessor::{CallOptions, HttpAccessor, MockAccessor, Payload, RemoteAccessor};
pub use channel::{AgentChannel, Channel, Connector, HypervisorChannel, SignedCommand};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use instance::{Instance, InstanceOptions};
pub use project::{CreateInstance, Project, ProjectInfo};
pub use snapshot::{Snapshot, SnapshotInfo, SnapshotStatus};
pub use state::{AgentDescriptor, InstanceSnapshot, InstanceStatus};
pub use tracker::{InstanceEvent, StateSubscription, StateTracker};

pub use vdev_id::{InstanceId, ProjectId, SnapshotId};
