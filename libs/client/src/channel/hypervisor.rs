//! Hypervisor channel over a WebSocket stream.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use vdev_id::InstanceId;

use super::link::JsonLink;
use super::stream::StreamTransport;
use super::{Channel, Connector, HypervisorChannel, SignedCommand};
use crate::error::{ClientError, Result};
use crate::state::InstanceSnapshot;

/// Port the hypervisor listens on at the instance's service address.
pub const HYPERVISOR_PORT: u16 = 9999;

/// Subprotocol tag sent when opening a hypervisor stream.
pub const HYPERVISOR_PROTOCOL: &str = "vdev-hypervisor.v1";

/// Hypervisor endpoint for `snapshot`, once it has a service address.
pub fn hypervisor_endpoint(snapshot: &InstanceSnapshot) -> Option<String> {
    let ip = snapshot.service_ip.as_deref().filter(|ip| !ip.is_empty())?;
    if ip.contains(':') {
        Some(format!("ws://[{ip}]:{HYPERVISOR_PORT}/hypervisor"))
    } else {
        Some(format!("ws://{ip}:{HYPERVISOR_PORT}/hypervisor"))
    }
}

/// Sign `request` for `instance`.
///
/// The signature is the hex SHA-256 of `key`, the instance id and the
/// serialized request, newline separated.
pub fn sign_command(instance: InstanceId, key: &str, request: Value) -> Result<SignedCommand> {
    if key.is_empty() {
        return Err(ClientError::MissingKey);
    }

    let body = serde_json::to_vec(&request)?;
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
    hasher.update(instance.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(&body);

    Ok(SignedCommand {
        instance,
        request,
        signature: hex::encode(hasher.finalize()),
    })
}

/// Hypervisor channel speaking JSON frames over a WebSocket.
#[derive(Debug)]
pub struct WsHypervisorChannel {
    endpoint: String,
    link: JsonLink,
}

#[async_trait]
impl Channel for WsHypervisorChannel {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.link.stream().is_open()
    }

    async fn disconnect(&self) {
        self.link.stream().close().await;
    }
}

#[async_trait]
impl HypervisorChannel for WsHypervisorChannel {
    fn sign(&self, instance: InstanceId, key: &str, request: Value) -> Result<SignedCommand> {
        sign_command(instance, key, request)
    }

    async fn send(&self, command: SignedCommand) -> Result<Value> {
        let frame = match serde_json::to_value(&command)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let mut response = self.link.request(frame).await?;
        if let Some(error) = response.remove("error").filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(ClientError::Hypervisor(message));
        }
        Ok(response.remove("result").unwrap_or(Value::Null))
    }
}

/// Opens [`WsHypervisorChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HypervisorConnector;

#[async_trait]
impl Connector<dyn HypervisorChannel> for HypervisorConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn HypervisorChannel>> {
        let stream = StreamTransport::open(endpoint, HYPERVISOR_PROTOCOL).await?;
        info!(endpoint, "Hypervisor channel connected");
        Ok(Arc::new(WsHypervisorChannel {
            endpoint: endpoint.to_string(),
            link: JsonLink::new(stream),
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::InstanceStatus;

    #[test]
    fn test_endpoint_requires_service_ip() {
        let mut snapshot = InstanceSnapshot::new(InstanceId::new(), InstanceStatus::On);
        assert_eq!(hypervisor_endpoint(&snapshot), None);

        snapshot.service_ip = Some(String::new());
        assert_eq!(hypervisor_endpoint(&snapshot), None);

        snapshot.service_ip = Some("10.11.0.5".into());
        assert_eq!(
            hypervisor_endpoint(&snapshot).as_deref(),
            Some("ws://10.11.0.5:9999/hypervisor")
        );

        snapshot.service_ip = Some("fd00::5".into());
        assert_eq!(
            hypervisor_endpoint(&snapshot).as_deref(),
            Some("ws://[fd00::5]:9999/hypervisor")
        );
    }

    #[test]
    fn test_sign_is_deterministic_and_key_bound() {
        let id = InstanceId::new();
        let request = json!({"type": "console", "op": "get"});

        let a = sign_command(id, "k1", request.clone()).unwrap();
        let b = sign_command(id, "k1", request.clone()).unwrap();
        let c = sign_command(id, "k2", request.clone()).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.signature, c.signature);
        assert_eq!(a.signature.len(), 64);
        assert_eq!(a.request, request);
        assert_eq!(a.instance, id);
    }

    #[test]
    fn test_sign_without_key_fails() {
        let err = sign_command(InstanceId::new(), "", json!({})).unwrap_err();
        assert!(matches!(err, ClientError::MissingKey));
    }
}
