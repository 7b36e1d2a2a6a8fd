//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Taint key the node lifecycle controller sets when it loses contact with a node.
pub const UNREACHABLE_TAINT_KEY: &str = "node.kubernetes.io/unreachable";

/// Lifecycle phase of a NodeClaim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeClaimPhase {
    /// Capacity has been requested but no machine is bound yet.
    #[default]
    Pending,
    /// The cloud provider returned a machine and a provider id.
    Launched,
    /// A Node with the same provider id joined the cluster.
    Registered,
    /// The Node is ready for workloads.
    Initialized,
}

/// A request for, and ownership record of, one provisioned machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaim {
    /// Unique name; also the reconcile key.
    pub name: String,
    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,
    /// Provider-assigned machine id. Absent until the machine is launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub phase: NodeClaimPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
}

impl NodeClaim {
    /// Create a pending claim with no machine bound yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Uuid::new_v4(),
            provider_id: None,
            phase: NodeClaimPhase::Pending,
            deletion_requested_at: None,
        }
    }

    /// Bind the claim to a launched machine.
    #[must_use]
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        if self.phase == NodeClaimPhase::Pending {
            self.phase = NodeClaimPhase::Launched;
        }
        self
    }

    /// Provider id, treating an empty string the same as an absent one.
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Scheduling effect of a taint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// A condition attached to a Node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_added: Option<DateTime<Utc>>,
}

impl Taint {
    /// The unreachable taint as set by the node lifecycle controller.
    pub fn unreachable(time_added: Option<DateTime<Utc>>) -> Self {
        Self {
            key: UNREACHABLE_TAINT_KEY.to_string(),
            value: None,
            effect: TaintEffect::NoExecute,
            time_added,
        }
    }

    /// Whether this taint marks the node as unreachable.
    pub fn is_unreachable(&self) -> bool {
        self.key == UNREACHABLE_TAINT_KEY
    }
}

/// Runtime registration of a machine in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

impl Node {
    /// Create an untainted node.
    pub fn new(name: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_id: provider_id.into(),
            taints: Vec::new(),
        }
    }

    /// Append a taint.
    #[must_use]
    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }
}

/// Options for a delete request against the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    /// `Some(0)` removes the object without waiting for graceful termination.
    pub grace_period_seconds: Option<i64>,
}

impl DeleteOptions {
    /// Zero grace period.
    pub const fn immediate() -> Self {
        Self {
            grace_period_seconds: Some(0),
        }
    }
}

/// Outcome of checking a node's taints, before any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No timestamped unreachable taint.
    NotUnreachable,
    /// Unreachable, but for less than the timeout.
    Pending {
        remaining: Duration,
        requeue_after: Duration,
    },
    /// Unreachable for at least the timeout; the claim must go.
    Expired { unreachable_for: Duration },
}

/// Verdict plus the data anomalies seen while producing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub verdict: Verdict,
    /// Unreachable taints inspected that carried no `time_added`.
    pub missing_timestamps: usize,
}

/// What a single reconcile ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// The claim no longer exists.
    NodeClaimGone,
    /// No single Node matches the claim's provider id.
    NodeNotResolved,
    /// The Node carries no unreachable taint.
    NoUnreachableTaint,
    /// Only unreachable taints without a timestamp were found.
    MissingTimestamp,
    /// Re-check scheduled.
    Requeued,
    /// The claim was deleted.
    Deleted,
}

/// Result of a reconcile, returned to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Run again after this delay; `None` means wait for the next event.
    pub requeue_after: Option<Duration>,
    pub outcome: Outcome,
}

impl ReconcileResult {
    /// Finished with no follow-up.
    pub const fn done(outcome: Outcome) -> Self {
        Self {
            requeue_after: None,
            outcome,
        }
    }

    /// Re-check after `after`.
    pub const fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
            outcome: Outcome::Requeued,
        }
    }

    /// Whether the claim was deleted during this reconcile.
    pub fn deleted(&self) -> bool {
        self.outcome == Outcome::Deleted
    }
}

impl fmt::Display for ReconcileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.requeue_after {
            Some(after) => write!(f, "{:?} (requeue after {}s)", self.outcome, after.as_secs()),
            None => write!(f, "{:?}", self.outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_taint() {
        let taint = Taint::unreachable(None);
        assert!(taint.is_unreachable());
        assert_eq!(taint.effect, TaintEffect::NoExecute);
    }

    #[test]
    fn test_empty_provider_id_is_absent() {
        let claim = NodeClaim::new("default-abc").with_provider_id("");
        assert_eq!(claim.provider_id(), None);
    }

    #[test]
    fn test_with_provider_id_launches() {
        let claim = NodeClaim::new("default-abc").with_provider_id("aws:///i-1");
        assert_eq!(claim.phase, NodeClaimPhase::Launched);
        assert_eq!(claim.provider_id(), Some("aws:///i-1"));
    }

    #[test]
    fn test_node_deserializes_camel_case() {
        let json = r#"{
            "name": "ip-10-0-0-1",
            "providerId": "aws:///i-1",
            "taints": [
                {"key": "node.kubernetes.io/unreachable", "effect": "NoExecute",
                 "timeAdded": "2026-10-17T10:00:00Z"}
            ]
        }"#;
        let node: Result<Node, _> = serde_json::from_str(json);
        assert!(node.is_ok());
        let node = node.ok();
        let taint = node.as_ref().and_then(|n| n.taints.first());
        assert!(taint.is_some_and(Taint::is_unreachable));
        assert!(taint.is_some_and(|t| t.time_added.is_some()));
    }

    #[test]
    fn test_immediate_delete_options() {
        assert_eq!(DeleteOptions::immediate().grace_period_seconds, Some(0));
    }

    #[test]
    fn test_reconcile_result_display() {
        let result = ReconcileResult::requeue(Duration::from_secs(360));
        assert!(result.to_string().contains("360s"));
        assert!(!result.deleted());
    }
}
