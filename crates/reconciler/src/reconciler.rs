//! Reconciler implementation.
//!
//! For one NodeClaim, the reconciler looks up the Node with the same provider
//! id and inspects its unreachable taint. Once the taint is older than the
//! configured timeout the claim is deleted with a zero grace period so that
//! replacement capacity can be provisioned; until then the claim is re-checked
//! shortly after the timeout would expire.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::store::ClusterStore;
use crate::types::{
    Assessment, DeleteOptions, Node, NodeClaim, Outcome, ReconcileResult, Verdict,
};

/// Default time a Node may stay unreachable before its NodeClaim is deleted.
pub const DEFAULT_UNREACHABLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Added on top of the remaining time when requeueing, so a re-check never
/// lands just before expiry under clock skew.
pub const REQUEUE_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How long a Node may carry the unreachable taint.
    pub unreachable_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            unreachable_timeout: DEFAULT_UNREACHABLE_TIMEOUT,
        }
    }
}

impl ReconcilerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.unreachable_timeout.is_zero() {
            return Err(Error::invalid_config("unreachable timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Deletes NodeClaims whose Node has been unreachable for too long.
///
/// Holds no mutable state, so one instance can serve any number of
/// concurrent reconciles.
pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn ClusterStore>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
        })
    }

    /// Reconcile the NodeClaim called `name`.
    ///
    /// Lookup misses (claim gone, no node, duplicate nodes) are expected races
    /// and end the reconcile without error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` when a read or the delete fails, and
    /// `Error::Cancelled` when `cancel` fires first. Both are retryable.
    pub async fn reconcile(&self, name: &str, cancel: &CancellationToken) -> Result<ReconcileResult> {
        let claim = match cancellable(cancel, self.store.get_node_claim(name)).await {
            Ok(claim) => claim,
            Err(e) if e.is_lookup_miss() => {
                debug!(nodeclaim = name, "NodeClaim no longer exists");
                return Ok(ReconcileResult::done(Outcome::NodeClaimGone));
            }
            Err(e) => return Err(e),
        };

        let node = match self.node_for_node_claim(&claim, cancel).await {
            Ok(node) => node,
            Err(e) if e.is_lookup_miss() => {
                debug!(nodeclaim = name, reason = %e, "No single Node for NodeClaim");
                return Ok(ReconcileResult::done(Outcome::NodeNotResolved));
            }
            Err(e) => return Err(e),
        };

        info!(nodeclaim = name, node = %node.name, "Checking Node taints");
        let assessment = self.assess(&node, self.clock.now());

        match assessment.verdict {
            Verdict::Pending {
                remaining,
                requeue_after,
            } => {
                info!(
                    nodeclaim = name,
                    node = %node.name,
                    remaining_secs = remaining.as_secs(),
                    requeue_after_secs = requeue_after.as_secs(),
                    "Node has been unreachable for less than unreachableTimeout, requeueing"
                );
                Ok(ReconcileResult::requeue(requeue_after))
            }
            Verdict::Expired { unreachable_for } => {
                self.delete_node_claim(&claim, &node, unreachable_for, cancel)
                    .await
            }
            Verdict::NotUnreachable if assessment.missing_timestamps > 0 => {
                Ok(ReconcileResult::done(Outcome::MissingTimestamp))
            }
            Verdict::NotUnreachable => Ok(ReconcileResult::done(Outcome::NoUnreachableTaint)),
        }
    }

    /// Inspect `node`'s taints at time `now` without touching the store.
    ///
    /// Taints are visited in order. Unreachable taints without a timestamp are
    /// reported and skipped; the first timestamped one decides.
    pub fn assess(&self, node: &Node, now: DateTime<Utc>) -> Assessment {
        let mut missing_timestamps = 0;

        for taint in node.taints.iter().filter(|t| t.is_unreachable()) {
            let Some(time_added) = taint.time_added else {
                missing_timestamps += 1;
                error!(node = %node.name, "Missing TimeAdded on unreachable taint");
                continue;
            };

            // A taint stamped in the future (clock skew) counts as just added.
            let elapsed = (now - time_added).to_std().unwrap_or(Duration::ZERO);
            let verdict = if elapsed < self.config.unreachable_timeout {
                let remaining = self.config.unreachable_timeout - elapsed;
                Verdict::Pending {
                    remaining,
                    requeue_after: ceil_to_second(remaining) + REQUEUE_SAFETY_MARGIN,
                }
            } else {
                Verdict::Expired {
                    unreachable_for: elapsed,
                }
            };
            return Assessment {
                verdict,
                missing_timestamps,
            };
        }

        Assessment {
            verdict: Verdict::NotUnreachable,
            missing_timestamps,
        }
    }

    /// Resolve the single Node sharing the claim's provider id.
    async fn node_for_node_claim(
        &self,
        claim: &NodeClaim,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let provider_id = claim
            .provider_id()
            .ok_or_else(|| Error::node_not_found(""))?;

        let nodes = cancellable(cancel, self.store.nodes_by_provider_id(provider_id)).await?;
        let count = nodes.len();
        nodes.into_iter().exactly_one().map_err(|_| {
            if count == 0 {
                Error::node_not_found(provider_id)
            } else {
                Error::duplicate_node(provider_id, count)
            }
        })
    }

    async fn delete_node_claim(
        &self,
        claim: &NodeClaim,
        node: &Node,
        unreachable_for: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        match cancellable(
            cancel,
            self.store
                .delete_node_claim(claim, DeleteOptions::immediate()),
        )
        .await
        {
            Ok(()) => {
                info!(
                    nodeclaim = %claim.name,
                    node = %node.name,
                    unreachable_secs = unreachable_for.as_secs(),
                    "Deleted NodeClaim because the node has been unreachable for more than unreachableTimeout"
                );
                Ok(ReconcileResult::done(Outcome::Deleted))
            }
            Err(e) if e.is_lookup_miss() => {
                debug!(nodeclaim = %claim.name, "NodeClaim already deleted");
                Ok(ReconcileResult::done(Outcome::NodeClaimGone))
            }
            Err(e) => {
                error!(
                    nodeclaim = %claim.name,
                    node = %node.name,
                    error = %e,
                    "Failed to delete NodeClaim"
                );
                Err(e)
            }
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Race a store call against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

fn ceil_to_second(duration: Duration) -> Duration {
    if duration.subsec_nanos() == 0 {
        duration
    } else {
        Duration::from_secs(duration.as_secs().saturating_add(1))
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn ClusterStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            clock: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the cluster store.
    pub fn with_store(mut self, store: Arc<dyn ClusterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the unreachable timeout.
    pub fn unreachable_timeout(mut self, timeout: Duration) -> Self {
        self.config.unreachable_timeout = timeout;
        self
    }

    /// Build the reconciler.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("cluster store is required"))?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Reconciler::new(store, clock, self.config)
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::InMemoryClusterStore;
    use crate::types::{Taint, TaintEffect};

    const PROVIDER_ID: &str = "aws:///us-west-2a/i-0123456789";

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn setup() -> (Reconciler, Arc<InMemoryClusterStore>, Arc<FixedClock>) {
        let store = InMemoryClusterStore::new_arc();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let reconciler = ReconcilerBuilder::new()
            .with_store(store.clone())
            .with_clock(clock.clone())
            .unreachable_timeout(minutes(10))
            .build()
            .unwrap();
        (reconciler, store, clock)
    }

    async fn seed(store: &InMemoryClusterStore, node: Node) {
        store
            .upsert_node_claim(NodeClaim::new("default-x7k2p").with_provider_id(PROVIDER_ID))
            .await;
        store.upsert_node(node).await;
    }

    fn unreachable_since(clock: &FixedClock, ago: chrono::Duration) -> Node {
        Node::new("ip-10-0-0-1", PROVIDER_ID).with_taint(Taint::unreachable(Some(clock.now() - ago)))
    }

    #[tokio::test]
    async fn test_no_node_is_noop() {
        let (reconciler, store, _) = setup();
        store
            .upsert_node_claim(NodeClaim::new("default-x7k2p").with_provider_id(PROVIDER_ID))
            .await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, ReconcileResult::done(Outcome::NodeNotResolved));
        assert!(store.contains_node_claim("default-x7k2p").await);
    }

    #[tokio::test]
    async fn test_claim_without_provider_id_is_noop() {
        let (reconciler, store, _) = setup();
        store.upsert_node_claim(NodeClaim::new("default-x7k2p")).await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome, Outcome::NodeNotResolved);
    }

    #[tokio::test]
    async fn test_missing_claim_is_noop() {
        let (reconciler, _, _) = setup();
        let result = reconciler
            .reconcile("gone", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, ReconcileResult::done(Outcome::NodeClaimGone));
    }

    #[tokio::test]
    async fn test_duplicate_nodes_are_noop() {
        let (reconciler, store, clock) = setup();
        seed(&store, unreachable_since(&clock, chrono::Duration::minutes(30))).await;
        store
            .upsert_node(
                Node::new("ip-10-0-0-2", PROVIDER_ID)
                    .with_taint(Taint::unreachable(Some(clock.now() - chrono::Duration::minutes(30)))),
            )
            .await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome, Outcome::NodeNotResolved);
        assert!(store.contains_node_claim("default-x7k2p").await);
    }

    #[tokio::test]
    async fn test_under_timeout_requeues_remaining_plus_margin() {
        let (reconciler, store, clock) = setup();
        seed(&store, unreachable_since(&clock, chrono::Duration::minutes(5))).await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, ReconcileResult::requeue(minutes(6)));
        assert!(store.contains_node_claim("default-x7k2p").await);
    }

    #[tokio::test]
    async fn test_over_timeout_deletes() {
        let (reconciler, store, clock) = setup();
        seed(&store, unreachable_since(&clock, chrono::Duration::minutes(11))).await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, ReconcileResult::done(Outcome::Deleted));
        assert!(!store.contains_node_claim("default-x7k2p").await);
    }

    #[tokio::test]
    async fn test_exactly_at_timeout_deletes() {
        let (reconciler, store, clock) = setup();
        seed(&store, unreachable_since(&clock, chrono::Duration::minutes(10))).await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.deleted());
    }

    #[tokio::test]
    async fn test_missing_timestamp_reports_without_action() {
        let (reconciler, store, _) = setup();
        seed(
            &store,
            Node::new("ip-10-0-0-1", PROVIDER_ID).with_taint(Taint::unreachable(None)),
        )
        .await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, ReconcileResult::done(Outcome::MissingTimestamp));
        assert!(store.contains_node_claim("default-x7k2p").await);
    }

    #[tokio::test]
    async fn test_other_taints_are_ignored() {
        let (reconciler, store, clock) = setup();
        seed(
            &store,
            Node::new("ip-10-0-0-1", PROVIDER_ID).with_taint(Taint {
                key: "node.kubernetes.io/not-ready".to_string(),
                value: None,
                effect: TaintEffect::NoExecute,
                time_added: Some(clock.now() - chrono::Duration::hours(1)),
            }),
        )
        .await;

        let result = reconciler
            .reconcile("default-x7k2p", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, ReconcileResult::done(Outcome::NoUnreachableTaint));
    }

    #[tokio::test]
    async fn test_cancelled_reconcile_fails_retryably() {
        let (reconciler, store, clock) = setup();
        seed(&store, unreachable_since(&clock, chrono::Duration::minutes(11))).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reconciler.reconcile("default-x7k2p", &cancel).await.err();

        assert_eq!(err, Some(Error::Cancelled));
        assert!(store.contains_node_claim("default-x7k2p").await);
    }

    #[tokio::test]
    async fn test_repeated_reconcile_is_stable_until_expiry() {
        let (reconciler, store, clock) = setup();
        seed(&store, unreachable_since(&clock, chrono::Duration::minutes(3))).await;
        let cancel = CancellationToken::new();

        let first = reconciler.reconcile("default-x7k2p", &cancel).await.unwrap();
        let second = reconciler.reconcile("default-x7k2p", &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, ReconcileResult::requeue(minutes(8)));

        clock.advance(chrono::Duration::minutes(8));
        let third = reconciler.reconcile("default-x7k2p", &cancel).await.unwrap();
        assert!(third.deleted());
    }

    #[test]
    fn test_assess_first_timestamped_taint_wins() {
        let (reconciler, _, clock) = setup();
        let now = clock.now();
        let node = Node::new("ip-10-0-0-1", PROVIDER_ID)
            .with_taint(Taint::unreachable(None))
            .with_taint(Taint::unreachable(Some(now - chrono::Duration::minutes(2))))
            .with_taint(Taint::unreachable(Some(now - chrono::Duration::minutes(20))));

        let assessment = reconciler.assess(&node, now);

        assert_eq!(assessment.missing_timestamps, 1);
        assert_eq!(
            assessment.verdict,
            Verdict::Pending {
                remaining: minutes(8),
                requeue_after: minutes(9),
            }
        );
    }

    #[test]
    fn test_assess_future_taint_counts_as_fresh() {
        let (reconciler, _, clock) = setup();
        let now = clock.now();
        let node = Node::new("ip-10-0-0-1", PROVIDER_ID)
            .with_taint(Taint::unreachable(Some(now + chrono::Duration::minutes(1))));

        let assessment = reconciler.assess(&node, now);

        assert_eq!(
            assessment.verdict,
            Verdict::Pending {
                remaining: minutes(10),
                requeue_after: minutes(11),
            }
        );
    }

    #[test]
    fn test_requeue_rounds_remaining_up() {
        let (reconciler, _, clock) = setup();
        let now = clock.now();
        let node = Node::new("ip-10-0-0-1", PROVIDER_ID).with_taint(Taint::unreachable(Some(
            now - chrono::Duration::milliseconds(5 * 60 * 1000 + 250),
        )));

        let verdict = reconciler.assess(&node, now).verdict;
        assert!(
            matches!(verdict, Verdict::Pending { requeue_after, .. } if requeue_after == minutes(6)),
            "unexpected verdict {verdict:?}"
        );
    }

    #[test]
    fn test_builder_requires_store() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ReconcilerBuilder::new()
            .with_store(InMemoryClusterStore::new_arc())
            .unreachable_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_defaults() {
        let reconciler = ReconcilerBuilder::new()
            .with_store(InMemoryClusterStore::new_arc())
            .build()
            .unwrap();
        assert_eq!(reconciler.config().unreachable_timeout, DEFAULT_UNREACHABLE_TIMEOUT);
    }
}
