//! Agent channel over a WebSocket stream.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::link::JsonLink;
use super::stream::StreamTransport;
use super::{AgentChannel, Channel, Connector};
use crate::error::{ClientError, Result};
use crate::state::InstanceSnapshot;

/// Subprotocol tag sent when opening an agent stream.
pub const AGENT_PROTOCOL: &str = "vdev-agent.v1";

/// Agent endpoint for `snapshot` under the WebSocket base `ws_base`, once the
/// platform reports an agent descriptor.
pub fn agent_endpoint(ws_base: &str, snapshot: &InstanceSnapshot) -> Option<String> {
    let info = snapshot
        .agent
        .as_ref()
        .map(|agent| agent.info.as_str())
        .filter(|info| !info.is_empty())?;
    Some(format!("{}/agent/{info}", ws_base.trim_end_matches('/')))
}

#[derive(Debug)]
pub struct WsAgentChannel {
    endpoint: String,
    link: JsonLink,
}

#[async_trait]
impl Channel for WsAgentChannel {
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
impl AgentChannel for WsAgentChannel {
    async fn ready(&self) -> Result<()> {
        let mut frame = Map::new();
        frame.insert("type".to_string(), json!("app"));
        frame.insert("op".to_string(), json!("ready"));
        let response = self.link.request(frame).await?;

        if response.get("success").and_then(Value::as_bool) == Some(true) {
            debug!(endpoint = %self.endpoint, "Agent ready");
            return Ok(());
        }
        let message = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("agent did not report ready")
            .to_string();
        Err(ClientError::Agent(message))
    }
}

/// Opens [`WsAgentChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentConnector;

#[async_trait]
impl Connector<dyn AgentChannel> for AgentConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn AgentChannel>> {
        let stream = StreamTransport::open(endpoint, AGENT_PROTOCOL).await?;
        info!(endpoint, "Agent channel connected");
        Ok(Arc::new(WsAgentChannel {
            endpoint: endpoint.to_string(),
            link: JsonLink::new(stream),
        }))
    }
}
