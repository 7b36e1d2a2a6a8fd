//! Dry-run report of what the controller would do for each NodeClaim.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;

use notready_reconciler::{ClusterStore, NodeClaim, Reconciler, Result, Verdict};

/// What a reconcile would do for one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlannedAction {
    /// No single Node shares the claim's provider id.
    NodeNotResolved,
    NoUnreachableTaint,
    MissingTimestamp,
    Requeue,
    Delete,
}

/// One line of the dry-run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReport {
    pub node_claim: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub action: PlannedAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreachable_for_secs: Option<u64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub missing_timestamps: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ClaimReport {
    fn new(claim: &NodeClaim, action: PlannedAction) -> Self {
        Self {
            node_claim: claim.name.clone(),
            node: None,
            action,
            requeue_after_secs: None,
            unreachable_for_secs: None,
            missing_timestamps: 0,
        }
    }
}

/// Assess every claim in `store` at `now` without deleting anything.
///
/// # Errors
///
/// Returns the store error if listing claims or nodes fails.
pub async fn check(
    store: &dyn ClusterStore,
    reconciler: &Reconciler,
    now: DateTime<Utc>,
) -> Result<Vec<ClaimReport>> {
    let mut reports = Vec::new();

    for claim in store.list_node_claims().await? {
        let nodes = match claim.provider_id() {
            Some(provider_id) => store.nodes_by_provider_id(provider_id).await?,
            None => Vec::new(),
        };
        let Ok(node) = nodes.into_iter().exactly_one() else {
            reports.push(ClaimReport::new(&claim, PlannedAction::NodeNotResolved));
            continue;
        };

        let assessment = reconciler.assess(&node, now);
        let mut report = match assessment.verdict {
            Verdict::NotUnreachable if assessment.missing_timestamps > 0 => {
                ClaimReport::new(&claim, PlannedAction::MissingTimestamp)
            }
            Verdict::NotUnreachable => ClaimReport::new(&claim, PlannedAction::NoUnreachableTaint),
            Verdict::Pending { requeue_after, .. } => ClaimReport {
                requeue_after_secs: Some(requeue_after.as_secs()),
                ..ClaimReport::new(&claim, PlannedAction::Requeue)
            },
            Verdict::Expired { unreachable_for } => ClaimReport {
                unreachable_for_secs: Some(unreachable_for.as_secs()),
                ..ClaimReport::new(&claim, PlannedAction::Delete)
            },
        };
        report.node = Some(node.name);
        report.missing_timestamps = assessment.missing_timestamps;
        reports.push(report);
    }

    Ok(reports)
}
