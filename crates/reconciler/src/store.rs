//! Cluster store trait and implementations.
//!
//! The reconciler reads NodeClaims and Nodes through [`ClusterStore`] and
//! deletes NodeClaims through it. Nodes are correlated to claims by provider
//! id, so every implementation must be able to answer "which nodes carry this
//! provider id" without a full scan; [`ProviderIdIndex`] does that for the
//! in-memory store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{DeleteOptions, Node, NodeClaim};

/// Trait for cluster object storage backends.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a NodeClaim by name. Returns `Error::NodeClaimNotFound` if absent.
    async fn get_node_claim(&self, name: &str) -> Result<NodeClaim>;

    /// List every NodeClaim, ordered by name.
    async fn list_node_claims(&self) -> Result<Vec<NodeClaim>>;

    /// Nodes whose provider id equals `provider_id`.
    async fn nodes_by_provider_id(&self, provider_id: &str) -> Result<Vec<Node>>;

    /// NodeClaims whose provider id equals `provider_id`.
    async fn node_claims_by_provider_id(&self, provider_id: &str) -> Result<Vec<NodeClaim>>;

    /// Delete a NodeClaim.
    async fn delete_node_claim(&self, claim: &NodeClaim, options: DeleteOptions) -> Result<()>;
}

#[async_trait]
impl<S: ClusterStore + ?Sized> ClusterStore for Arc<S> {
    async fn get_node_claim(&self, name: &str) -> Result<NodeClaim> {
        (**self).get_node_claim(name).await
    }

    async fn list_node_claims(&self) -> Result<Vec<NodeClaim>> {
        (**self).list_node_claims().await
    }

    async fn nodes_by_provider_id(&self, provider_id: &str) -> Result<Vec<Node>> {
        (**self).nodes_by_provider_id(provider_id).await
    }

    async fn node_claims_by_provider_id(&self, provider_id: &str) -> Result<Vec<NodeClaim>> {
        (**self).node_claims_by_provider_id(provider_id).await
    }

    async fn delete_node_claim(&self, claim: &NodeClaim, options: DeleteOptions) -> Result<()> {
        (**self).delete_node_claim(claim, options).await
    }
}

/// Index from provider id to object names.
#[derive(Debug, Clone, Default)]
pub struct ProviderIdIndex {
    entries: HashMap<String, BTreeSet<String>>,
}

impl ProviderIdIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` carries `provider_id`. Empty ids are not indexed.
    pub fn insert(&mut self, provider_id: &str, name: &str) {
        if provider_id.is_empty() {
            return;
        }
        self.entries
            .entry(provider_id.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// Forget that `name` carries `provider_id`.
    pub fn remove(&mut self, provider_id: &str, name: &str) {
        if let Some(names) = self.entries.get_mut(provider_id) {
            names.remove(name);
            if names.is_empty() {
                self.entries.remove(provider_id);
            }
        }
    }

    /// Names indexed under `provider_id`, in sorted order.
    pub fn get(&self, provider_id: &str) -> Vec<&str> {
        self.entries
            .get(provider_id)
            .map(|names| names.iter().map(String::as_str).collect_vec())
            .unwrap_or_default()
    }

    /// Number of distinct provider ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct StoreState {
    node_claims: HashMap<String, NodeClaim>,
    nodes: HashMap<String, Node>,
    claim_index: ProviderIdIndex,
    node_index: ProviderIdIndex,
}

impl StoreState {
    fn remove_node_claim(&mut self, name: &str) -> Option<NodeClaim> {
        let removed = self.node_claims.remove(name)?;
        if let Some(provider_id) = removed.provider_id() {
            self.claim_index.remove(provider_id, name);
        }
        Some(removed)
    }

    fn remove_node(&mut self, name: &str) -> Option<Node> {
        let removed = self.nodes.remove(name)?;
        self.node_index.remove(&removed.provider_id, name);
        Some(removed)
    }
}

/// In-memory cluster store, keeping the provider id indexes in step with
/// every write.
#[derive(Debug, Default)]
pub struct InMemoryClusterStore {
    state: RwLock<StoreState>,
}

impl InMemoryClusterStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create or replace a NodeClaim.
    pub async fn upsert_node_claim(&self, claim: NodeClaim) {
        let mut state = self.state.write().await;
        state.remove_node_claim(&claim.name);
        if let Some(provider_id) = claim.provider_id() {
            state.claim_index.insert(provider_id, &claim.name);
        }
        state.node_claims.insert(claim.name.clone(), claim);
    }

    /// Create or replace a Node.
    pub async fn upsert_node(&self, node: Node) {
        let mut state = self.state.write().await;
        state.remove_node(&node.name);
        state.node_index.insert(&node.provider_id, &node.name);
        state.nodes.insert(node.name.clone(), node);
    }

    /// Remove a Node, returning it if it existed.
    pub async fn remove_node(&self, name: &str) -> Option<Node> {
        self.state.write().await.remove_node(name)
    }

    /// Whether a NodeClaim with this name exists.
    pub async fn contains_node_claim(&self, name: &str) -> bool {
        self.state.read().await.node_claims.contains_key(name)
    }

    /// Number of stored NodeClaims.
    pub async fn node_claim_count(&self) -> usize {
        self.state.read().await.node_claims.len()
    }

    /// Number of distinct provider ids carried by stored Nodes.
    pub async fn indexed_node_provider_ids(&self) -> usize {
        self.state.read().await.node_index.len()
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn get_node_claim(&self, name: &str) -> Result<NodeClaim> {
        self.state
            .read()
            .await
            .node_claims
            .get(name)
            .cloned()
            .ok_or_else(|| Error::node_claim_not_found(name))
    }

    async fn list_node_claims(&self) -> Result<Vec<NodeClaim>> {
        let state = self.state.read().await;
        Ok(state
            .node_claims
            .values()
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .cloned()
            .collect_vec())
    }

    async fn nodes_by_provider_id(&self, provider_id: &str) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(state
            .node_index
            .get(provider_id)
            .into_iter()
            .filter_map(|name| state.nodes.get(name).cloned())
            .collect_vec())
    }

    async fn node_claims_by_provider_id(&self, provider_id: &str) -> Result<Vec<NodeClaim>> {
        let state = self.state.read().await;
        Ok(state
            .claim_index
            .get(provider_id)
            .into_iter()
            .filter_map(|name| state.node_claims.get(name).cloned())
            .collect_vec())
    }

    async fn delete_node_claim(&self, claim: &NodeClaim, options: DeleteOptions) -> Result<()> {
        let mut state = self.state.write().await;
        if options.grace_period_seconds == Some(0) {
            return state
                .remove_node_claim(&claim.name)
                .map(|_| ())
                .ok_or_else(|| Error::node_claim_not_found(&claim.name));
        }

        // Graceful deletion only records the request; the object stays until
        // whoever owns termination removes it.
        let stored = state
            .node_claims
            .get_mut(&claim.name)
            .ok_or_else(|| Error::node_claim_not_found(&claim.name))?;
        stored.deletion_requested_at.get_or_insert_with(Utc::now);
        Ok(())
    }
}

/// A wrapper that adds tracing to a cluster store.
pub struct TracingClusterStore<S: ClusterStore> {
    inner: S,
}

impl<S: ClusterStore> TracingClusterStore<S> {
    /// Create a new tracing cluster store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ClusterStore> ClusterStore for TracingClusterStore<S> {
    async fn get_node_claim(&self, name: &str) -> Result<NodeClaim> {
        tracing::debug!(nodeclaim = name, "Getting NodeClaim");
        self.inner.get_node_claim(name).await
    }

    async fn list_node_claims(&self) -> Result<Vec<NodeClaim>> {
        tracing::debug!("Listing NodeClaims");
        self.inner.list_node_claims().await
    }

    async fn nodes_by_provider_id(&self, provider_id: &str) -> Result<Vec<Node>> {
        tracing::debug!(provider_id, "Listing Nodes by provider id");
        let result = self.inner.nodes_by_provider_id(provider_id).await;
        if let Ok(ref nodes) = result {
            tracing::trace!(provider_id, count = nodes.len(), "Nodes listed");
        }
        result
    }

    async fn node_claims_by_provider_id(&self, provider_id: &str) -> Result<Vec<NodeClaim>> {
        tracing::debug!(provider_id, "Listing NodeClaims by provider id");
        self.inner.node_claims_by_provider_id(provider_id).await
    }

    async fn delete_node_claim(&self, claim: &NodeClaim, options: DeleteOptions) -> Result<()> {
        tracing::debug!(
            nodeclaim = %claim.name,
            grace_period_seconds = ?options.grace_period_seconds,
            "Deleting NodeClaim"
        );
        self.inner.delete_node_claim(claim, options).await
    }
}
