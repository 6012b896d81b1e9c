//! The instance handle.
//!
//! An [`Instance`] is the client-side view of one remote device. It reads
//! from the tracker's cached snapshot, issues lifecycle commands through the
//! remote accessor, and reaches the running device through at most one
//! hypervisor channel and one agent channel.
//!
//! Commands never touch the cached state. The platform applies them
//! asynchronously; observe the effect with [`Instance::refresh`] or one of
//! the wait methods.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::info;
use vdev_id::InstanceId;

use crate::accessor::{call_json, CallOptions, RemoteAccessor};
use crate::channel::{
    agent_endpoint, hypervisor_endpoint, AgentChannel, AgentConnector, ChannelSlot, Connector,
    HypervisorChannel, HypervisorConnector,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::snapshot::{Snapshot, SnapshotInfo};
use crate::state::{InstanceSnapshot, InstanceStatus};
use crate::tracker::{StateSubscription, StateTracker};
use crate::waiter;

/// How handles are wired: poll timing plus the channel connectors.
#[derive(Clone)]
pub struct InstanceOptions {
    pub poll_interval: Duration,

    /// WebSocket base the agent endpoint is derived from.
    pub ws_base: String,

    pub hypervisor: Arc<dyn Connector<dyn HypervisorChannel>>,
    pub agent: Arc<dyn Connector<dyn AgentChannel>>,
}

impl InstanceOptions {
    /// Options for handles created under `config`, using WebSocket channels.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            ws_base: config.ws_base(),
            hypervisor: Arc::new(HypervisorConnector),
            agent: Arc::new(AgentConnector),
        }
    }

    pub fn with_hypervisor_connector(
        mut self,
        connector: Arc<dyn Connector<dyn HypervisorChannel>>,
    ) -> Self {
        self.hypervisor = connector;
        self
    }

    pub fn with_agent_connector(mut self, connector: Arc<dyn Connector<dyn AgentChannel>>) -> Self {
        self.agent = connector;
        self
    }
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl std::fmt::Debug for InstanceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOptions")
            .field("poll_interval", &self.poll_interval)
            .field("ws_base", &self.ws_base)
            .finish_non_exhaustive()
    }
}

/// Handle to a remote instance. Clones share the same state and channels.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<Inner>,
}

struct Inner {
    tracker: Arc<StateTracker>,
    accessor: Arc<dyn RemoteAccessor>,
    hypervisor: ChannelSlot<dyn HypervisorChannel>,
    agent: ChannelSlot<dyn AgentChannel>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("tracker", &self.inner.tracker)
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Wrap an already-fetched snapshot in a handle.
    pub fn new(
        accessor: Arc<dyn RemoteAccessor>,
        initial: InstanceSnapshot,
        options: &InstanceOptions,
    ) -> Self {
        let tracker = StateTracker::new(Arc::clone(&accessor), initial, options.poll_interval);

        let ws_base = options.ws_base.clone();
        let hypervisor = ChannelSlot::new(
            "hypervisor",
            hypervisor_endpoint,
            Arc::clone(&options.hypervisor),
        );
        let agent = ChannelSlot::new(
            "agent",
            move |snapshot: &InstanceSnapshot| agent_endpoint(&ws_base, snapshot),
            Arc::clone(&options.agent),
        );

        Self {
            inner: Arc::new(Inner {
                tracker,
                accessor,
                hypervisor,
                agent,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Cached state
    // -------------------------------------------------------------------------

    pub fn id(&self) -> InstanceId {
        self.inner.tracker.id()
    }

    pub fn name(&self) -> String {
        self.snapshot().name.clone()
    }

    pub fn state(&self) -> InstanceStatus {
        self.snapshot().state.clone()
    }

    pub fn flavor(&self) -> String {
        self.snapshot().flavor.clone()
    }

    pub fn panicked(&self) -> bool {
        self.snapshot().panicked
    }

    /// The last fetched snapshot. May be stale until the next refresh.
    pub fn snapshot(&self) -> Arc<InstanceSnapshot> {
        self.inner.tracker.snapshot()
    }

    /// Number of state changes observed by this handle.
    pub fn revision(&self) -> u64 {
        self.inner.tracker.revision()
    }

    /// The tracker backing this handle.
    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.inner.tracker
    }

    /// Fetch the remote state now. See [`StateTracker::refresh`].
    pub async fn refresh(&self) -> Result<Arc<InstanceSnapshot>> {
        self.inner.tracker.refresh().await
    }

    /// Subscribe to state change, panic and poll failure events.
    ///
    /// Keeps the background poller alive until dropped.
    pub fn subscribe(&self) -> StateSubscription {
        self.inner.tracker.subscribe()
    }

    // -------------------------------------------------------------------------
    // Waiting
    // -------------------------------------------------------------------------

    /// Resolve with the first snapshot satisfying `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<Arc<InstanceSnapshot>>
    where
        F: FnMut(&InstanceSnapshot) -> bool + Send,
    {
        waiter::wait_until(&self.inner.tracker, predicate).await
    }

    /// Like [`Instance::wait_for`], treating predicate errors as "not yet".
    pub async fn try_wait_for<F, E>(&self, predicate: F) -> Result<Arc<InstanceSnapshot>>
    where
        F: FnMut(&InstanceSnapshot) -> std::result::Result<bool, E> + Send,
        E: std::fmt::Display,
    {
        waiter::try_wait_until(&self.inner.tracker, predicate).await
    }

    pub async fn wait_for_state(&self, status: InstanceStatus) -> Result<Arc<InstanceSnapshot>> {
        waiter::wait_for_state(&self.inner.tracker, status).await
    }

    pub async fn wait_for_state_timeout(
        &self,
        status: InstanceStatus,
        timeout: Duration,
    ) -> Result<Arc<InstanceSnapshot>> {
        waiter::wait_until_timeout(timeout, self.wait_for_state(status)).await
    }

    pub async fn wait_for_timeout<F>(
        &self,
        predicate: F,
        timeout: Duration,
    ) -> Result<Arc<InstanceSnapshot>>
    where
        F: FnMut(&InstanceSnapshot) -> bool + Send,
    {
        waiter::wait_until_timeout(timeout, self.wait_for(predicate)).await
    }

    // -------------------------------------------------------------------------
    // Lifecycle commands
    // -------------------------------------------------------------------------

    pub async fn start(&self) -> Result<()> {
        self.command("start").await
    }

    pub async fn stop(&self) -> Result<()> {
        self.command("stop").await
    }

    pub async fn reboot(&self) -> Result<()> {
        self.command("reboot").await
    }

    pub async fn pause(&self) -> Result<()> {
        self.command("pause").await
    }

    pub async fn unpause(&self) -> Result<()> {
        self.command("unpause").await
    }

    pub async fn rename(&self, name: &str) -> Result<()> {
        info!(instance_id = %self.id(), name, "Renaming instance");
        self.inner
            .accessor
            .call(&self.path(), CallOptions::patch().json(json!({ "name": name })))
            .await?;
        Ok(())
    }

    /// Ask the platform to delete the instance.
    ///
    /// The handle stays usable; the cached state reaches `deleted` once a
    /// refresh observes it.
    pub async fn destroy(&self) -> Result<()> {
        info!(instance_id = %self.id(), "Destroying instance");
        self.inner
            .accessor
            .call(&self.path(), CallOptions::delete())
            .await?;
        Ok(())
    }

    async fn command(&self, action: &str) -> Result<()> {
        info!(instance_id = %self.id(), action, "Issuing instance command");
        self.inner
            .accessor
            .call(&format!("{}/{action}", self.path()), CallOptions::post())
            .await?;
        Ok(())
    }

    fn path(&self) -> String {
        format!("/instances/{}", self.id())
    }

    // -------------------------------------------------------------------------
    // Channels
    // -------------------------------------------------------------------------

    /// The live hypervisor channel, connecting or reconnecting as needed.
    ///
    /// Waits until the instance reports a service address.
    pub async fn hypervisor(&self) -> Result<Arc<dyn HypervisorChannel>> {
        self.inner.hypervisor.acquire(&self.inner.tracker).await
    }

    /// The live agent channel, once the agent reports ready.
    pub async fn agent(&self) -> Result<Arc<dyn AgentChannel>> {
        let channel = self.inner.agent.acquire(&self.inner.tracker).await?;
        channel.ready().await?;
        Ok(channel)
    }

    /// Sign and send a hypervisor request, returning its result payload.
    pub async fn hypervisor_request(&self, request: Value) -> Result<Value> {
        let channel = self.hypervisor().await?;
        let key = self.snapshot().key.clone().unwrap_or_default();
        let command = channel.sign(self.id(), &key, request)?;
        channel.send(command).await
    }

    /// Console output captured by the hypervisor.
    pub async fn console_log(&self) -> Result<String> {
        let result = self
            .hypervisor_request(json!({ "type": "console", "op": "get" }))
            .await?;
        match result.get("log") {
            Some(Value::String(log)) => Ok(log.clone()),
            Some(Value::Null) | None => Ok(String::new()),
            Some(other) => Err(ClientError::Hypervisor(format!(
                "unexpected console log payload: {other}"
            ))),
        }
    }

    /// Panics recorded since the last clear.
    pub async fn panic_log(&self) -> Result<Vec<Value>> {
        let result = self
            .hypervisor_request(json!({ "type": "panic", "op": "get" }))
            .await?;
        panics_field(result)
    }

    /// Clear recorded panics, returning the cleared entries.
    pub async fn clear_panics(&self) -> Result<Vec<Value>> {
        let result = self
            .hypervisor_request(json!({ "type": "panic", "op": "clear" }))
            .await?;
        panics_field(result)
    }

    // -------------------------------------------------------------------------
    // Snapshots and media
    // -------------------------------------------------------------------------

    pub async fn snapshots(&self) -> Result<Vec<Snapshot>> {
        let infos: Vec<SnapshotInfo> = call_json(
            &*self.inner.accessor,
            &format!("{}/snapshots", self.path()),
            CallOptions::get(),
        )
        .await?;
        Ok(infos.into_iter().map(|info| self.wrap_snapshot(info)).collect())
    }

    pub async fn create_snapshot(&self, name: &str) -> Result<Snapshot> {
        info!(instance_id = %self.id(), name, "Creating snapshot");
        let info: SnapshotInfo = call_json(
            &*self.inner.accessor,
            &format!("{}/snapshots", self.path()),
            CallOptions::post().json(json!({ "name": name })),
        )
        .await?;
        Ok(self.wrap_snapshot(info))
    }

    fn wrap_snapshot(&self, info: SnapshotInfo) -> Snapshot {
        Snapshot::new(self.id(), info, Arc::clone(&self.inner.accessor))
    }

    /// Current screen contents as an encoded image.
    pub async fn screenshot(&self) -> Result<Bytes> {
        self.inner
            .accessor
            .call(&format!("{}/screenshot", self.path()), CallOptions::get().raw())
            .await?
            .into_bytes()
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Tear the handle down locally.
    ///
    /// Stops polling, fails pending waits with [`ClientError::Closed`] and
    /// disconnects both channels. The remote instance is not affected.
    pub async fn close(&self) {
        self.inner.tracker.close();
        self.inner.hypervisor.release().await;
        self.inner.agent.release().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tracker.is_closed()
    }
}

fn panics_field(mut result: Value) -> Result<Vec<Value>> {
    match result.get_mut("panics").map(Value::take) {
        Some(Value::Array(panics)) => Ok(panics),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(ClientError::Hypervisor(format!(
            "unexpected panic log payload: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::*;
    use crate::accessor::MockAccessor;

    fn setup(state: &str) -> (Arc<MockAccessor>, Instance) {
        let id = InstanceId::new();
        let mock = Arc::new(MockAccessor::new());
        let initial: InstanceSnapshot = serde_json::from_value(json!({
            "id": id,
            "name": "pixel",
            "state": state,
            "flavor": "pixel-7"
        }))
        .unwrap();
        let instance = Instance::new(mock.clone(), initial, &InstanceOptions::default());
        (mock, instance)
    }

    #[test]
    fn test_accessors_project_cached_state() {
        let (mock, instance) = setup("off");
        assert_eq!(instance.name(), "pixel");
        assert_eq!(instance.state(), InstanceStatus::Off);
        assert_eq!(instance.flavor(), "pixel-7");
        assert!(!instance.panicked());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_commands_hit_their_routes() {
        let (mock, instance) = setup("off");
        let base = format!("/instances/{}", instance.id());
        for action in ["start", "stop", "reboot", "pause", "unpause"] {
            mock.respond_json(Method::POST, format!("{base}/{action}"), Value::Null);
        }
        mock.respond_json(Method::PATCH, &base, json!({}));
        mock.respond_json(Method::DELETE, &base, Value::Null);

        instance.start().await.unwrap();
        instance.stop().await.unwrap();
        instance.reboot().await.unwrap();
        instance.pause().await.unwrap();
        instance.unpause().await.unwrap();
        instance.rename("renamed").await.unwrap();
        instance.destroy().await.unwrap();

        let calls = mock.calls();
        let routes: Vec<_> = calls
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect();
        assert_eq!(
            routes,
            vec![
                format!("POST {base}/start"),
                format!("POST {base}/stop"),
                format!("POST {base}/reboot"),
                format!("POST {base}/pause"),
                format!("POST {base}/unpause"),
                format!("PATCH {base}"),
                format!("DELETE {base}"),
            ]
        );
        assert_eq!(calls[5].body, Some(json!({"name": "renamed"})));
        assert_eq!(instance.name(), "pixel");
        assert_eq!(instance.revision(), 0);
    }

    #[tokio::test]
    async fn test_command_failure_propagates() {
        let (mock, instance) = setup("off");
        mock.fail(
            Method::POST,
            format!("/instances/{}/start", instance.id()),
            409,
            "instance is busy",
        );

        let err = instance.start().await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 409, .. }));
        assert_eq!(instance.state(), InstanceStatus::Off);
    }

    #[tokio::test]
    async fn test_snapshots_wrap_records() {
        let (mock, instance) = setup("on");
        let path = format!("/instances/{}/snapshots", instance.id());
        mock.respond_json(
            Method::GET,
            &path,
            json!([
                {"id": vdev_id::SnapshotId::new(), "name": "a"},
                {"id": vdev_id::SnapshotId::new(), "name": "b", "status": {"created": true}}
            ]),
        );
        mock.respond_json(
            Method::POST,
            &path,
            json!({"id": vdev_id::SnapshotId::new(), "name": "c"}),
        );

        let snapshots = instance.snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].name(), "b");
        assert!(snapshots[1].is_created());
        assert_eq!(snapshots[0].instance_id(), instance.id());

        let created = instance.create_snapshot("c").await.unwrap();
        assert_eq!(created.name(), "c");
        assert_eq!(mock.calls()[1].body, Some(json!({"name": "c"})));
    }

    #[tokio::test]
    async fn test_screenshot_returns_raw_bytes() {
        let (mock, instance) = setup("on");
        let path = format!("/instances/{}/screenshot", instance.id());
        mock.respond_raw(Method::GET, &path, &b"\x89PNG"[..]);

        let image = instance.screenshot().await.unwrap();
        assert_eq!(&image[..], b"\x89PNG");
        assert!(mock.calls()[0].raw);
    }

    #[test]
    fn test_panics_field() {
        assert_eq!(panics_field(json!({"panics": [1, 2]})).unwrap().len(), 2);
        assert!(panics_field(json!({})).unwrap().is_empty());
        assert!(panics_field(json!({"panics": "x"})).is_err());
    }
}
