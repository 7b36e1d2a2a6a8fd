//! Controller that feeds watch events through the reconciler.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::events::{EventMapper, WatchEvent};
use crate::queue::{DelayedKeys, WorkQueue};
use crate::reconciler::Reconciler;
use crate::retry::RetryPolicy;
use crate::types::ReconcileResult;

/// Default cap on reconciles running at once.
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 100;

/// Configuration for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Maximum reconciles of distinct claims running at once.
    pub max_concurrent_reconciles: usize,
    /// Backoff applied to failed reconciles.
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if no reconcile would ever be allowed to run.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::invalid_config(
                "max_concurrent_reconciles must be at least 1",
            ));
        }
        Ok(())
    }
}

type Joined = std::result::Result<Result<ReconcileResult>, JoinError>;

/// Reconcile tasks in flight, keyed back to the claim each one serves.
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<Result<ReconcileResult>>,
    keys: HashMap<task::Id, String>,
}

impl InFlight {
    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn spawn(&mut self, key: String, reconciler: Arc<Reconciler>, cancel: CancellationToken) {
        let task_key = key.clone();
        let handle = self
            .tasks
            .spawn(async move { reconciler.reconcile(&task_key, &cancel).await });
        self.keys.insert(handle.id(), key);
    }

    /// Next finished task and its claim, including tasks that panicked.
    async fn join_next(&mut self) -> Option<(Option<String>, Joined)> {
        let joined = self.tasks.join_next_with_id().await?;
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        Some((self.keys.remove(&id), joined.map(|(_, result)| result)))
    }
}

/// Runs reconciles for every NodeClaim named by incoming watch events.
///
/// Distinct claims reconcile in parallel up to the configured limit. A given
/// claim is never reconciled twice at once. Requeue directives and retryable
/// failures put the claim back on the queue after a delay; a claim has at most
/// one pending delay, the earliest one asked for.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    mapper: EventMapper,
    config: ControllerConfig,
    stop: CancellationToken,
}

impl Controller {
    /// Create a new controller.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is invalid.
    pub fn new(
        reconciler: Arc<Reconciler>,
        mapper: EventMapper,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reconciler,
            mapper,
            config,
            stop: CancellationToken::new(),
        })
    }

    /// Get a handle that stops the controller.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            stop: self.stop.clone(),
        }
    }

    /// Run until stopped.
    ///
    /// The controller keeps running after `events` closes so pending
    /// requeues still fire. On stop, in-flight reconciles are cancelled and
    /// awaited, and pending delays are dropped.
    pub async fn run(&self, mut events: mpsc::Receiver<WatchEvent>) {
        info!(
            max_concurrent_reconciles = self.config.max_concurrent_reconciles,
            unreachable_timeout_secs = self.reconciler.config().unreachable_timeout.as_secs(),
            "Starting NodeClaim controller"
        );

        let mut queue = WorkQueue::new();
        let mut delayed = DelayedKeys::new();
        let mut in_flight = InFlight::default();
        let mut events_open = true;

        loop {
            self.dispatch(&mut queue, &mut in_flight);

            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                Some((key, joined)) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match key {
                        Some(key) => self.complete(&mut queue, &mut delayed, key, joined),
                        None => error!("Finished reconcile task has no NodeClaim recorded"),
                    }
                }
                Some(key) = delayed.next_due(), if !delayed.is_empty() => queue.add(key),
                event = events.recv(), if events_open => match event {
                    Some(event) => self.enqueue(&mut queue, &event).await,
                    None => {
                        debug!("Watch event stream closed");
                        events_open = false;
                    }
                },
            }
        }

        let cancelled = in_flight.len();
        while let Some((key, joined)) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(
                    node_claim = ?key,
                    error = %e,
                    "Reconcile task ended abnormally during shutdown"
                );
            }
        }
        info!(
            cancelled,
            dropped_requeues = delayed.len(),
            "NodeClaim controller stopped"
        );
    }

    /// Start queued reconciles up to the concurrency limit.
    fn dispatch(&self, queue: &mut WorkQueue, in_flight: &mut InFlight) {
        while in_flight.len() < self.config.max_concurrent_reconciles {
            let Some(key) = queue.pop() else {
                break;
            };
            in_flight.spawn(key, Arc::clone(&self.reconciler), self.stop.child_token());
        }
    }

    async fn enqueue(&self, queue: &mut WorkQueue, event: &WatchEvent) {
        match self.mapper.requests_for(event).await {
            Ok(keys) => keys.into_iter().for_each(|key| queue.add(key)),
            Err(e) => warn!(error = %e, ?event, "Failed to map watch event to NodeClaims"),
        }
    }

    fn complete(
        &self,
        queue: &mut WorkQueue,
        delayed: &mut DelayedKeys,
        key: String,
        joined: Joined,
    ) {
        queue.done(&key);

        let failure = match joined {
            Ok(Ok(result)) => {
                queue.forget(&key);
                if let Some(after) = result.requeue_after {
                    debug!(
                        node_claim = %key,
                        requeue_after_secs = after.as_secs(),
                        "Requeue scheduled"
                    );
                    delayed.add_after(key, after);
                }
                return;
            }
            Ok(Err(e)) if !e.is_retryable() => {
                queue.forget(&key);
                error!(
                    node_claim = %key,
                    error = %e,
                    "Reconcile failed with a non-retryable error, waiting for the next event"
                );
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("reconcile task panicked: {e}"),
        };

        let (attempt, backoff) = queue.record_failure(&key, &self.config.retry);
        error!(
            node_claim = %key,
            error = %failure,
            attempt,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "Reconcile failed"
        );
        delayed.add_after(key, backoff);
    }
}

/// Handle to stop a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    stop: CancellationToken,
}

impl ControllerHandle {
    /// Stop the controller.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Check if stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::InMemoryClusterStore;

    fn controller(config: ControllerConfig) -> Result<Controller> {
        let store = InMemoryClusterStore::new_arc();
        let reconciler = Arc::new(
            crate::reconciler::ReconcilerBuilder::new()
                .with_store(store.clone())
                .build()?,
        );
        Controller::new(reconciler, EventMapper::new(store), config)
    }

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_concurrent_reconciles, 100);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = controller(ControllerConfig {
            max_concurrent_reconciles: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_handle_stops_idle_controller() {
        let controller = controller(ControllerConfig::default());
        assert!(controller.is_ok());
        let Ok(controller) = controller else {
            return;
        };
        let handle = controller.handle();
        let (_tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(async move { controller.run(rx).await });
        handle.stop();

        let finished = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(finished.is_ok(), "Controller should stop within timeout");
        assert!(handle.is_stopped());
    }
}
