//! Watch events and their translation into reconcile requests.

use std::sync::Arc;

use itertools::Itertools;
use tracing::trace;

use crate::error::Result;
use crate::store::ClusterStore;
use crate::types::{Node, NodeClaim};

/// A change observed by the watch layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A NodeClaim was created, updated or deleted.
    NodeClaim(String),
    /// A Node was created, updated or deleted.
    Node(Node),
}

impl WatchEvent {
    /// Event for a NodeClaim change.
    pub fn node_claim(claim: &NodeClaim) -> Self {
        Self::NodeClaim(claim.name.clone())
    }
}

/// Maps watch events to the NodeClaim names that need reconciling.
pub struct EventMapper {
    store: Arc<dyn ClusterStore>,
}

impl EventMapper {
    /// Create a new event mapper.
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// NodeClaim names affected by `event`.
    ///
    /// A Node maps to every claim sharing its provider id; a Node without one
    /// maps to nothing.
    ///
    /// # Errors
    ///
    /// Returns the store error if the provider id lookup fails.
    pub async fn requests_for(&self, event: &WatchEvent) -> Result<Vec<String>> {
        match event {
            WatchEvent::NodeClaim(name) => Ok(vec![name.clone()]),
            WatchEvent::Node(node) if node.provider_id.is_empty() => {
                trace!(node = %node.name, "Node has no provider id yet");
                Ok(Vec::new())
            }
            WatchEvent::Node(node) => Ok(self
                .store
                .node_claims_by_provider_id(&node.provider_id)
                .await?
                .into_iter()
                .map(|claim| claim.name)
                .collect_vec()),
        }
    }
}
