//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The NodeClaim is not in the store (usually already deleted).
    #[error("nodeclaim '{name}' not found")]
    NodeClaimNotFound { name: String },

    /// No Node carries the claim's provider id.
    #[error("no node found for provider id '{provider_id}'")]
    NodeNotFound { provider_id: String },

    /// More than one Node carries the same provider id.
    #[error("expected a single node for provider id '{provider_id}', found {count}")]
    DuplicateNode { provider_id: String, count: usize },

    /// A store read or write failed.
    #[error("store operation '{operation}' failed: {reason}")]
    Store { operation: String, reason: String },

    /// The invocation was cancelled before it finished.
    #[error("reconcile cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a nodeclaim not found error.
    pub fn node_claim_not_found(name: impl Into<String>) -> Self {
        Self::NodeClaimNotFound { name: name.into() }
    }

    /// Create a node not found error.
    pub fn node_not_found(provider_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            provider_id: provider_id.into(),
        }
    }

    /// Create a duplicate node error.
    pub fn duplicate_node(provider_id: impl Into<String>, count: usize) -> Self {
        Self::DuplicateNode {
            provider_id: provider_id.into(),
            count,
        }
    }

    /// Create a store error.
    pub fn store(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Expected races between watch delivery and the store; never worth a retry.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Self::NodeClaimNotFound { .. } | Self::NodeNotFound { .. } | Self::DuplicateNode { .. }
        )
    }

    /// Whether the supervisor should retry the reconcile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Cancelled)
    }
}
