//! At most one live channel of a kind per instance.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Channel, Connector};
use crate::error::Result;
use crate::state::InstanceSnapshot;
use crate::tracker::StateTracker;
use crate::waiter::wait_until;

type EndpointFn = Box<dyn Fn(&InstanceSnapshot) -> Option<String> + Send + Sync>;

/// Holds zero or one channel of type `C` and hands it out on demand.
///
/// Acquisitions are serialized on the slot. A stored channel is reused while
/// it is connected and its endpoint still matches what the cached state
/// derives; otherwise it is disconnected before a replacement is built.
pub struct ChannelSlot<C: ?Sized + Channel + 'static> {
    kind: &'static str,
    endpoint: EndpointFn,
    connector: Arc<dyn Connector<C>>,
    current: Mutex<Option<Arc<C>>>,
}

impl<C: ?Sized + Channel + 'static> std::fmt::Debug for ChannelSlot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<C: ?Sized + Channel + 'static> ChannelSlot<C> {
    /// Create an empty slot.
    ///
    /// `endpoint` derives the target endpoint from a snapshot, returning
    /// `None` while the instance cannot be reached yet.
    pub fn new<F>(kind: &'static str, endpoint: F, connector: Arc<dyn Connector<C>>) -> Self
    where
        F: Fn(&InstanceSnapshot) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            kind,
            endpoint: Box::new(endpoint),
            connector,
            current: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Endpoint derived from `snapshot`, if reachable.
    pub fn endpoint_for(&self, snapshot: &InstanceSnapshot) -> Option<String> {
        (self.endpoint)(snapshot)
    }

    /// Return a live channel for the tracked instance.
    ///
    /// Waits (without a bound) until the cached state yields an endpoint.
    pub async fn acquire(&self, tracker: &Arc<StateTracker>) -> Result<Arc<C>> {
        loop {
            wait_until(tracker, |snapshot| self.endpoint_for(snapshot).is_some()).await?;

            let mut current = self.current.lock().await;
            // State may have moved while we waited for the lock.
            let Some(endpoint) = self.endpoint_for(&tracker.snapshot()) else {
                continue;
            };

            if let Some(channel) = current.as_ref() {
                if channel.is_connected() && channel.endpoint() == endpoint {
                    debug!(kind = self.kind, %endpoint, "Reusing channel");
                    return Ok(Arc::clone(channel));
                }
            }

            if let Some(stale) = current.take() {
                info!(
                    kind = self.kind,
                    endpoint = stale.endpoint(),
                    connected = stale.is_connected(),
                    "Replacing channel"
                );
                stale.disconnect().await;
            }

            let channel = self.connector.connect(&endpoint).await?;
            *current = Some(Arc::clone(&channel));
            return Ok(channel);
        }
    }

    /// The stored channel, without checking liveness.
    pub async fn current(&self) -> Option<Arc<C>> {
        self.current.lock().await.clone()
    }

    /// Disconnect and drop the stored channel, if any.
    pub async fn release(&self) {
        let stale = self.current.lock().await.take();
        if let Some(channel) = stale {
            info!(kind = self.kind, endpoint = channel.endpoint(), "Releasing channel");
            channel.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Method;
    use serde_json::json;
    use vdev_id::InstanceId;

    use super::*;
    use crate::accessor::MockAccessor;
    use crate::error::ClientError;
    use crate::state::InstanceStatus;

    type Log = Arc<StdMutex<Vec<String>>>;

    #[derive(Debug)]
    struct FakeChannel {
        endpoint: String,
        connected: AtomicBool,
        log: Log,
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("disconnect {}", self.endpoint));
        }
    }

    struct FakeConnector {
        log: Log,
        refuse: AtomicBool,
    }

    #[async_trait]
    impl Connector<FakeChannel> for FakeConnector {
        async fn connect(&self, endpoint: &str) -> Result<Arc<FakeChannel>> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ClientError::StreamClosed);
            }
            self.log.lock().unwrap().push(format!("connect {endpoint}"));
            Ok(Arc::new(FakeChannel {
                endpoint: endpoint.to_string(),
                connected: AtomicBool::new(true),
                log: Arc::clone(&self.log),
            }))
        }
    }

    struct Fixture {
        mock: Arc<MockAccessor>,
        tracker: Arc<StateTracker>,
        slot: Arc<ChannelSlot<FakeChannel>>,
        connector: Arc<FakeConnector>,
        log: Log,
        path: String,
    }

    impl Fixture {
        fn new(service_ip: Option<&str>) -> Self {
            let id = InstanceId::new();
            let path = format!("/instances/{id}");
            let mock = Arc::new(MockAccessor::new());
            let mut initial = InstanceSnapshot::new(id, InstanceStatus::On);
            initial.service_ip = service_ip.map(str::to_string);
            let tracker = StateTracker::new(mock.clone(), initial, Duration::from_secs(1));

            let log = Log::default();
            let connector = Arc::new(FakeConnector {
                log: Arc::clone(&log),
                refuse: AtomicBool::new(false),
            });
            let slot = Arc::new(ChannelSlot::new(
                "fake",
                |s: &InstanceSnapshot| s.service_ip.as_ref().map(|ip| format!("ws://{ip}")),
                connector.clone() as Arc<dyn Connector<FakeChannel>>,
            ));

            Self {
                mock,
                tracker,
                slot,
                connector,
                log,
                path,
            }
        }

        fn set_service_ip(&self, ip: &str) {
            let id = self.tracker.id();
            self.mock.respond_json(
                Method::GET,
                &self.path,
                json!({"id": id, "state": "on", "serviceIp": ip}),
            );
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_stable_endpoint_reuses_channel() {
        let fx = Fixture::new(Some("10.0.0.1"));

        let a = fx.slot.acquire(&fx.tracker).await.unwrap();
        let b = fx.slot.acquire(&fx.tracker).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fx.log(), vec!["connect ws://10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_endpoint_change_disconnects_old_before_connecting_new() {
        let fx = Fixture::new(Some("10.0.0.1"));
        let first = fx.slot.acquire(&fx.tracker).await.unwrap();

        fx.set_service_ip("10.0.0.2");
        fx.tracker.refresh().await.unwrap();
        let second = fx.slot.acquire(&fx.tracker).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.is_connected());
        assert_eq!(
            fx.log(),
            vec![
                "connect ws://10.0.0.1",
                "disconnect ws://10.0.0.1",
                "connect ws://10.0.0.2",
            ]
        );
    }

    #[tokio::test]
    async fn test_dead_channel_is_replaced() {
        let fx = Fixture::new(Some("10.0.0.1"));
        let first = fx.slot.acquire(&fx.tracker).await.unwrap();
        first.connected.store(false, Ordering::SeqCst);

        let second = fx.slot.acquire(&fx.tracker).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(fx.log().len(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_slot_empty() {
        let fx = Fixture::new(Some("10.0.0.1"));
        fx.slot.acquire(&fx.tracker).await.unwrap();

        fx.set_service_ip("10.0.0.2");
        fx.tracker.refresh().await.unwrap();
        fx.connector.refuse.store(true, Ordering::SeqCst);

        let err = fx.slot.acquire(&fx.tracker).await.unwrap_err();
        assert!(matches!(err, ClientError::StreamClosed));
        assert!(fx.slot.current().await.is_none());
        assert_eq!(fx.log().last().unwrap(), "disconnect ws://10.0.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_endpoint() {
        let fx = Fixture::new(None);
        fx.mock.respond_json(
            Method::GET,
            &fx.path,
            json!({"id": fx.tracker.id(), "state": "on"}),
        );

        let pending = tokio::spawn({
            let slot = Arc::clone(&fx.slot);
            let tracker = Arc::clone(&fx.tracker);
            async move { slot.acquire(&tracker).await }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!pending.is_finished());
        assert!(fx.log().is_empty());

        fx.set_service_ip("10.0.0.9");
        let channel = pending.await.unwrap().unwrap();
        assert_eq!(channel.endpoint(), "ws://10.0.0.9");
    }

    #[tokio::test]
    async fn test_release_disconnects() {
        let fx = Fixture::new(Some("10.0.0.1"));
        let channel = fx.slot.acquire(&fx.tracker).await.unwrap();

        fx.slot.release().await;
        fx.slot.release().await;

        assert!(!channel.is_connected());
        assert!(fx.slot.current().await.is_none());
        assert_eq!(
            fx.log(),
            vec!["connect ws://10.0.0.1", "disconnect ws://10.0.0.1"]
        );
    }
}
