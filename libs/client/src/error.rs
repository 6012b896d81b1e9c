//! Error types for the instance client.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced by instance handles and their collaborators.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The platform answered with a non-success status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A hypervisor or agent channel could not be established.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("stream error: {0}")]
    Stream(#[from] tungstenite::Error),

    #[error("stream closed")]
    StreamClosed,

    /// The hypervisor rejected a command.
    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    /// The device agent rejected a request.
    #[error("agent error: {0}")]
    Agent(String),

    /// A hypervisor command needed key material the instance has not reported.
    #[error("instance has no key material for command signing")]
    MissingKey,

    /// The background poll failed; waiters relying on it cannot make progress.
    #[error("background state poll failed: {0}")]
    PollFailed(#[source] Arc<ClientError>),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The instance handle was closed while the operation was pending.
    #[error("instance handle closed")]
    Closed,

    #[error(transparent)]
    Id(#[from] vdev_id::IdError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Create an API error from response details.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the platform reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;
