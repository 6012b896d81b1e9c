//! Wait until a predicate over the cached state holds.
//!
//! A wait evaluates its predicate once against the current snapshot. If that
//! fails it registers as an observer (starting the poller if needed) and
//! re-evaluates on every state change until the predicate holds, the poller
//! fails, or the handle is closed. Dropping the wait future deregisters it.
//!
//! There is no internal timeout; [`wait_until_timeout`] imposes one from the
//! outside.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::trace;

use crate::error::{ClientError, Result};
use crate::state::{InstanceSnapshot, InstanceStatus};
use crate::tracker::{PollFailure, StateTracker};

/// Resolve with the first cached snapshot for which `predicate` is true.
///
/// # Errors
///
/// - [`ClientError::PollFailed`] if the background poll fails while waiting.
/// - [`ClientError::Closed`] if the handle is closed.
pub async fn wait_until<F>(tracker: &Arc<StateTracker>, mut predicate: F) -> Result<Arc<InstanceSnapshot>>
where
    F: FnMut(&InstanceSnapshot) -> bool + Send,
{
    if tracker.is_closed() {
        return Err(ClientError::Closed);
    }

    let mut state = tracker.watch_state();
    let current = Arc::clone(&state.borrow_and_update().snapshot);
    if predicate(&current) {
        return Ok(current);
    }

    // Subscribe before registering so a failure of the loop we may start is
    // never missed.
    let mut failures = tracker.watch_poll_failures();
    let mut shutdown = tracker.watch_shutdown();
    let _guard = tracker.register();
    // Failures of loops that ended before this registration are not ours.
    let generation = tracker.poll_generation();

    let satisfied = async {
        state
            .wait_for(|cached| predicate(&cached.snapshot))
            .await
            .map(|cached| Arc::clone(&cached.snapshot))
            .map_err(|_| ClientError::Closed)
    };

    tokio::select! {
        result = satisfied => result,
        error = next_poll_failure(&mut failures, generation) => {
            Err(ClientError::PollFailed(error))
        }
        _ = shutdown.wait_for(|closed| *closed) => Err(ClientError::Closed),
    }
}

/// Like [`wait_until`], for predicates that can fail.
///
/// A predicate error means "not satisfied yet"; it is logged and never
/// returned to the caller.
pub async fn try_wait_until<F, E>(
    tracker: &Arc<StateTracker>,
    mut predicate: F,
) -> Result<Arc<InstanceSnapshot>>
where
    F: FnMut(&InstanceSnapshot) -> std::result::Result<bool, E> + Send,
    E: Display,
{
    wait_until(tracker, move |snapshot| match predicate(snapshot) {
        Ok(satisfied) => satisfied,
        Err(e) => {
            trace!(instance_id = %snapshot.id, error = %e, "Wait predicate failed");
            false
        }
    })
    .await
}

/// Resolve once the instance reports `status`.
pub async fn wait_for_state(
    tracker: &Arc<StateTracker>,
    status: InstanceStatus,
) -> Result<Arc<InstanceSnapshot>> {
    wait_until(tracker, move |snapshot| snapshot.state == status).await
}

/// Bound any wait by `timeout`.
pub async fn wait_until_timeout<T>(
    timeout: Duration,
    wait: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
}

async fn next_poll_failure(
    failures: &mut watch::Receiver<Option<PollFailure>>,
    generation: u64,
) -> Arc<ClientError> {
    loop {
        if failures.changed().await.is_err() {
            // Tracker gone; the shutdown arm or the state arm resolves instead.
            std::future::pending::<()>().await;
        }
        match failures.borrow_and_update().clone() {
            Some(failure) if failure.generation >= generation => return failure.error,
            Some(failure) => {
                trace!(
                    generation = failure.generation,
                    "Ignoring failure of an earlier poll loop"
                );
            }
            None => {}
        }
    }
}
