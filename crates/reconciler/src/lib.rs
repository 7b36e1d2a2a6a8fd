//! K8s-style reconciler that garbage-collects NodeClaims whose Node stays
//! unreachable.
//!
//! A NodeClaim is the provisioner's record of a machine it launched. When the
//! Node backing it carries the `node.kubernetes.io/unreachable` taint for
//! longer than the configured timeout, the claim is deleted with a zero grace
//! period so a replacement can be provisioned.
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! For each NodeClaim name the reconciler:
//! 1. Fetches the claim (gone means nothing to do)
//! 2. Resolves its Node by provider id (no single match means nothing to do)
//! 3. Reads the unreachable taint and its timestamp
//! 4. Requeues until the timeout elapses, then deletes the claim
//!
//! ## Controller
//!
//! [`Controller`] turns [`WatchEvent`]s into reconcile requests, runs up to
//! 100 reconciles at once, serialises work per claim and retries failures
//! with exponential backoff.
//!
//! # Example
//!
//! ```ignore
//! use notready_reconciler::{
//!     Controller, ControllerConfig, EventMapper, InMemoryClusterStore, ReconcilerBuilder,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> notready_reconciler::Result<()> {
//!     let store = InMemoryClusterStore::new_arc();
//!     let reconciler = Arc::new(ReconcilerBuilder::new().with_store(store.clone()).build()?);
//!     let controller =
//!         Controller::new(reconciler, EventMapper::new(store), ControllerConfig::default())?;
//!
//!     let (_events_tx, events_rx) = tokio::sync::mpsc::channel(1024);
//!     let handle = controller.handle();
//!     // handle.stop() from elsewhere ends the run
//!     controller.run(events_rx).await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod clock;
pub mod controller;
pub mod error;
pub mod events;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod types;

// Re-export main types
pub use clock::{Clock, FixedClock, SystemClock};
pub use controller::{Controller, ControllerConfig, ControllerHandle};
pub use error::{Error, Result};
pub use events::{EventMapper, WatchEvent};
pub use queue::{DelayedKeys, WorkQueue};
pub use reconciler::{
    DEFAULT_UNREACHABLE_TIMEOUT, REQUEUE_SAFETY_MARGIN, Reconciler, ReconcilerBuilder,
    ReconcilerConfig,
};
pub use retry::RetryPolicy;
pub use store::{ClusterStore, InMemoryClusterStore, ProviderIdIndex, TracingClusterStore};
pub use types::{
    Assessment, DeleteOptions, Node, NodeClaim, NodeClaimPhase, Outcome, ReconcileResult, Taint,
    TaintEffect, UNREACHABLE_TAINT_KEY, Verdict,
};
