//! Persistent control channels to a running instance.
//!
//! Two kinds exist per instance: the hypervisor channel (signed low-level
//! commands) and the agent channel (in-device agent). Both share the
//! [`Channel`] liveness contract and are created by a [`Connector`]; a
//! [`ChannelSlot`] keeps at most one live channel of a kind per instance.

mod agent;
mod hypervisor;
mod link;
mod slot;
mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vdev_id::InstanceId;

use crate::error::Result;

pub use agent::{agent_endpoint, AgentConnector, WsAgentChannel, AGENT_PROTOCOL};
pub use hypervisor::{
    hypervisor_endpoint, sign_command, HypervisorConnector, WsHypervisorChannel,
    HYPERVISOR_PORT, HYPERVISOR_PROTOCOL,
};
pub use slot::ChannelSlot;
pub use stream::{ByteStream, StreamStatus, StreamTransport};

/// Liveness contract shared by every channel kind.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The endpoint this channel was opened against.
    fn endpoint(&self) -> &str;

    /// Whether the underlying connection is still usable.
    fn is_connected(&self) -> bool;

    /// Close the connection. Safe to call more than once.
    async fn disconnect(&self);
}

/// Builds channels of type `C` against an endpoint.
#[async_trait]
pub trait Connector<C: ?Sized + Send + Sync + 'static>: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<C>>;
}

/// A hypervisor command bound to an instance and signed with its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedCommand {
    pub instance: InstanceId,
    pub request: Value,
    pub signature: String,
}

/// Channel to the instance's virtualization layer.
#[async_trait]
pub trait HypervisorChannel: Channel {
    /// Sign `request` for `instance` with its key material.
    fn sign(&self, instance: InstanceId, key: &str, request: Value) -> Result<SignedCommand>;

    /// Send a signed command and return the decoded result.
    async fn send(&self, command: SignedCommand) -> Result<Value>;
}

/// Channel to the in-device agent.
///
/// The agent's file, app and instrumentation surface lives above this
/// contract; the instance handle only needs to know the agent is ready.
#[async_trait]
pub trait AgentChannel: Channel {
    async fn ready(&self) -> Result<()>;
}
