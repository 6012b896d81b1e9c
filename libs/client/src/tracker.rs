//! Cached instance state and the lazy background poller.
//!
//! The [`StateTracker`] owns the last snapshot fetched from the platform. It
//! refreshes on demand and, while at least one observer is registered, runs
//! a single background loop that refreshes once per poll interval.
//!
//! ```text
//! observer registers ──▶ ensure_polling ──▶ poll_loop (one per tracker)
//!                                              │
//!                                   refresh ◀──┤  sleep(poll_interval)
//!                                      │       │  observers > 0 ? loop : stop
//!                         changed? ────┘
//!                           │
//!                           ├──▶ watch: cached state + revision (waiters)
//!                           └──▶ broadcast: InstanceEvent (subscriptions)
//! ```
//!
//! Observers are counted explicitly: every [`ObserverGuard`] adds one on
//! creation and removes one on drop. The loop checks the count once per
//! cycle after sleeping, so the last observer leaving stops polling after at
//! most one more interval.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};
use vdev_id::InstanceId;

use crate::accessor::{call_json, CallOptions, RemoteAccessor};
use crate::error::{ClientError, Result};
use crate::state::InstanceSnapshot;

/// Capacity of the per-instance event channel.
const EVENT_CAPACITY: usize = 64;

/// Notification emitted by a tracker.
#[derive(Debug, Clone)]
pub enum InstanceEvent {
    /// A refresh found a structurally different snapshot.
    StateChanged(Arc<InstanceSnapshot>),

    /// The instance entered a panicked condition it was not in before.
    Panicked(Arc<InstanceSnapshot>),

    /// The background poll failed and stopped.
    PollFailed(Arc<ClientError>),
}

/// A failure of the poll loop started as `generation`.
#[derive(Debug, Clone)]
pub(crate) struct PollFailure {
    pub generation: u64,
    pub error: Arc<ClientError>,
}

/// Low bit of the poll state: a loop is scheduled.
const POLL_ACTIVE: u64 = 1;

/// Cached state plus the number of changes observed so far.
#[derive(Debug, Clone)]
pub(crate) struct Cached {
    pub snapshot: Arc<InstanceSnapshot>,
    pub revision: u64,
}

/// Owns the cached snapshot of one instance.
pub struct StateTracker {
    id: InstanceId,
    path: String,
    accessor: Arc<dyn RemoteAccessor>,
    poll_interval: Duration,

    state: watch::Sender<Cached>,
    events: broadcast::Sender<InstanceEvent>,
    poll_failures: watch::Sender<Option<PollFailure>>,
    shutdown: watch::Sender<bool>,

    observers: AtomicUsize,
    /// Loop generation shifted left by one, with [`POLL_ACTIVE`] as the low
    /// bit. Claiming a loop bumps the generation in the same CAS.
    poll_state: AtomicU64,
}

impl std::fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTracker")
            .field("id", &self.id)
            .field("revision", &self.revision())
            .field("observers", &self.observer_count())
            .field("polling", &self.is_polling())
            .finish()
    }
}

impl StateTracker {
    /// Create a tracker seeded with an already-fetched snapshot.
    pub fn new(
        accessor: Arc<dyn RemoteAccessor>,
        initial: InstanceSnapshot,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let id = initial.id;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            id,
            path: format!("/instances/{id}"),
            accessor,
            poll_interval,
            state: watch::Sender::new(Cached {
                snapshot: Arc::new(initial),
                revision: 0,
            }),
            events,
            poll_failures: watch::Sender::new(None),
            shutdown: watch::Sender::new(false),
            observers: AtomicUsize::new(0),
            poll_state: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The cached snapshot. Never triggers a fetch.
    pub fn snapshot(&self) -> Arc<InstanceSnapshot> {
        Arc::clone(&self.state.borrow().snapshot)
    }

    /// Number of state changes detected since the tracker was created.
    pub fn revision(&self) -> u64 {
        self.state.borrow().revision
    }

    /// Number of live observers (subscriptions and pending waits).
    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    /// Whether a background polling task is currently scheduled.
    pub fn is_polling(&self) -> bool {
        self.poll_state.load(Ordering::SeqCst) & POLL_ACTIVE != 0
    }

    /// Generation of the most recently started poll loop (0 before any).
    pub(crate) fn poll_generation(&self) -> u64 {
        self.poll_state.load(Ordering::SeqCst) >> 1
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Fetch the remote snapshot and replace the cache if it changed.
    ///
    /// Returns the cached snapshot after the update. On failure the cache is
    /// left untouched.
    pub async fn refresh(&self) -> Result<Arc<InstanceSnapshot>> {
        let fresh: InstanceSnapshot =
            call_json(&*self.accessor, &self.path, CallOptions::get()).await?;
        self.apply(fresh);
        Ok(self.snapshot())
    }

    /// Replace the cached snapshot if `fresh` differs structurally.
    ///
    /// Returns true if a change was recorded.
    pub(crate) fn apply(&self, fresh: InstanceSnapshot) -> bool {
        let mut newly_panicked = false;
        let mut replaced = None;

        self.state.send_if_modified(|cached| {
            if *cached.snapshot == fresh {
                return false;
            }
            newly_panicked = fresh.panicked && !cached.snapshot.panicked;
            let fresh = Arc::new(fresh);
            cached.snapshot = Arc::clone(&fresh);
            cached.revision += 1;
            replaced = Some((fresh, cached.revision));
            true
        });

        let Some((snapshot, revision)) = replaced else {
            trace!(instance_id = %self.id, "Refresh found no change");
            return false;
        };

        debug!(
            instance_id = %self.id,
            state = %snapshot.state,
            revision,
            "Instance state changed"
        );
        let _ = self
            .events
            .send(InstanceEvent::StateChanged(Arc::clone(&snapshot)));

        if newly_panicked {
            warn!(instance_id = %self.id, "Instance panicked");
            let _ = self.events.send(InstanceEvent::Panicked(snapshot));
        }
        true
    }

    /// Register an observer, starting the poller if none is running.
    pub(crate) fn register(self: &Arc<Self>) -> ObserverGuard {
        let observers = self.observers.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(instance_id = %self.id, observers, "Observer registered");
        self.ensure_polling();
        ObserverGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Subscribe to instance events. Keeps the poller running while held.
    pub fn subscribe(self: &Arc<Self>) -> StateSubscription {
        let events = self.events.subscribe();
        let shutdown = self.shutdown.subscribe();
        StateSubscription {
            events,
            shutdown,
            _guard: self.register(),
        }
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<Cached> {
        self.state.subscribe()
    }

    /// Receiver that only reports poll failures published after this call.
    pub(crate) fn watch_poll_failures(&self) -> watch::Receiver<Option<PollFailure>> {
        self.poll_failures.subscribe()
    }

    /// Announce that the loop of `generation` failed.
    pub(crate) fn publish_poll_failure(&self, generation: u64, error: ClientError) {
        let error = Arc::new(error);
        self.poll_failures.send_replace(Some(PollFailure {
            generation,
            error: Arc::clone(&error),
        }));
        let _ = self.events.send(InstanceEvent::PollFailed(error));
    }

    pub(crate) fn watch_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stop polling and fail pending waits. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            info!(instance_id = %self.id, "Instance handle closed");
        }
    }

    /// Mark a loop as scheduled, returning its new generation, unless one
    /// already is.
    fn claim_poll(&self) -> Option<u64> {
        let mut current = self.poll_state.load(Ordering::SeqCst);
        loop {
            if current & POLL_ACTIVE != 0 {
                return None;
            }
            let generation = (current >> 1) + 1;
            match self.poll_state.compare_exchange(
                current,
                (generation << 1) | POLL_ACTIVE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(generation),
                Err(actual) => current = actual,
            }
        }
    }

    fn release_poll(&self) {
        self.poll_state.fetch_and(!POLL_ACTIVE, Ordering::SeqCst);
    }

    fn ensure_polling(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        if let Some(generation) = self.claim_poll() {
            tokio::spawn(Arc::clone(self).poll_loop(generation));
        }
    }

    async fn poll_loop(self: Arc<Self>, mut generation: u64) {
        let mut shutdown = self.shutdown.subscribe();
        debug!(
            instance_id = %self.id,
            interval_ms = self.poll_interval.as_millis() as u64,
            generation,
            "State polling started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            if let Err(e) = self.refresh().await {
                // No retry: the loop stops and everyone waiting on it hears why.
                // A waiter that starts a new loop in between ignores this
                // failure by its generation.
                self.release_poll();
                warn!(
                    instance_id = %self.id,
                    generation,
                    error = %e,
                    "State poll failed; polling stopped"
                );
                self.publish_poll_failure(generation, e);
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.wait_for(|closed| *closed) => break,
            }

            if self.observer_count() == 0 {
                self.release_poll();
                // An observer may have registered between the check and the store.
                if self.observer_count() > 0 {
                    if let Some(next) = self.claim_poll() {
                        generation = next;
                        continue;
                    }
                }
                debug!(instance_id = %self.id, "State polling stopped");
                return;
            }
        }

        self.release_poll();
        debug!(instance_id = %self.id, "State polling stopped (handle closed)");
    }
}

/// Keeps one observer registered for as long as it lives.
#[derive(Debug)]
pub(crate) struct ObserverGuard {
    tracker: Arc<StateTracker>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        let observers = self.tracker.observers.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!(instance_id = %self.tracker.id, observers, "Observer removed");
    }
}

/// A live subscription to instance events.
///
/// The tracker keeps polling while any subscription exists; dropping it
/// unsubscribes.
#[derive(Debug)]
pub struct StateSubscription {
    events: broadcast::Receiver<InstanceEvent>,
    shutdown: watch::Receiver<bool>,
    _guard: ObserverGuard,
}

impl StateSubscription {
    /// Wait for the next event. Returns `None` once the handle is closed.
    pub async fn recv(&mut self) -> Option<InstanceEvent> {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Instance event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = self.shutdown.wait_for(|closed| *closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::accessor::MockAccessor;
    use crate::state::InstanceStatus;

    fn setup(state: &str) -> (Arc<MockAccessor>, Arc<StateTracker>, String) {
        let id = InstanceId::new();
        let path = format!("/instances/{id}");
        let mock = Arc::new(MockAccessor::new());
        mock.respond_json(Method::GET, &path, json!({"id": id, "state": state}));

        let initial = InstanceSnapshot::new(id, InstanceStatus::from(state.to_string()));
        let tracker = StateTracker::new(mock.clone(), initial, Duration::from_secs(1));
        (mock, tracker, path)
    }

    #[tokio::test]
    async fn test_refresh_without_change_keeps_revision() {
        let (_mock, tracker, _) = setup("off");
        let before = tracker.snapshot();

        let after = tracker.refresh().await.unwrap();
        assert_eq!(tracker.revision(), 0);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_refresh_change_bumps_revision_once() {
        let (mock, tracker, path) = setup("off");
        let id = tracker.id();
        mock.respond_json(Method::GET, &path, json!({"id": id, "state": "on"}));

        tracker.refresh().await.unwrap();
        tracker.refresh().await.unwrap();

        assert_eq!(tracker.snapshot().state, InstanceStatus::On);
        assert_eq!(tracker.revision(), 1);
        assert_eq!(tracker.observer_count(), 0);
        assert!(!tracker.is_polling());
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_cache() {
        let (mock, tracker, path) = setup("off");
        mock.fail(Method::GET, &path, 503, "unavailable");

        let err = tracker.refresh().await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 503, .. }));
        assert_eq!(tracker.snapshot().state, InstanceStatus::Off);
        assert_eq!(tracker.revision(), 0);
    }

    #[tokio::test]
    async fn test_panic_event_only_on_transition() {
        let (mock, tracker, path) = setup("on");
        let id = tracker.id();
        let mut subscription = tracker.subscribe();

        mock.respond_json(
            Method::GET,
            &path,
            json!({"id": id, "state": "on", "panicked": true}),
        );
        tracker.refresh().await.unwrap();

        assert!(matches!(
            subscription.recv().await,
            Some(InstanceEvent::StateChanged(_))
        ));
        assert!(matches!(
            subscription.recv().await,
            Some(InstanceEvent::Panicked(s)) if s.panicked
        ));

        // Still panicked, other field changed: no second panic event.
        mock.respond_json(
            Method::GET,
            &path,
            json!({"id": id, "state": "on", "panicked": true, "name": "x"}),
        );
        tracker.refresh().await.unwrap();
        assert!(matches!(
            subscription.recv().await,
            Some(InstanceEvent::StateChanged(s)) if s.name == "x"
        ));
        assert!(subscription.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_poll_loop_for_many_observers() {
        let (mock, tracker, path) = setup("on");

        let first = tracker.subscribe();
        assert!(tracker.is_polling());
        let second = tracker.subscribe();
        assert_eq!(tracker.observer_count(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.call_count(&Method::GET, &path), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.call_count(&Method::GET, &path), 2);

        drop(first);
        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_one_cycle_after_last_observer() {
        let (mock, tracker, path) = setup("on");

        let subscription = tracker.subscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(subscription);

        // Not immediately.
        assert!(tracker.is_polling());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!tracker.is_polling());
        assert_eq!(mock.call_count(&Method::GET, &path), 1);

        // Re-armable, as a new loop generation.
        assert_eq!(tracker.poll_generation(), 1);
        let _again = tracker.subscribe();
        assert!(tracker.is_polling());
        assert_eq!(tracker.poll_generation(), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.call_count(&Method::GET, &path), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_stops_loop_and_notifies() {
        let (mock, tracker, path) = setup("on");
        mock.fail(Method::GET, &path, 500, "boom");

        let mut subscription = tracker.subscribe();
        let event = subscription.recv().await;
        assert!(matches!(
            event,
            Some(InstanceEvent::PollFailed(e)) if matches!(*e, ClientError::Api { status: 500, .. })
        ));
        assert!(!tracker.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_polling_and_ends_subscriptions() {
        let (_mock, tracker, _) = setup("on");
        let mut subscription = tracker.subscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;

        tracker.close();
        assert!(subscription.recv().await.is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!tracker.is_polling());

        // Closed trackers never start a new loop.
        let _late = tracker.subscribe();
        assert!(!tracker.is_polling());
    }
}
