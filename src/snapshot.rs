//! Cluster snapshots: NodeClaims and Nodes loaded from a YAML or JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use notready_core::{Error, Result, ResultExt};
use notready_reconciler::{InMemoryClusterStore, Node, NodeClaim};

/// A point-in-time view of the objects the controller reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub node_claims: Vec<NodeClaim>,
    pub nodes: Vec<Node>,
}

impl Snapshot {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Load a snapshot, picking the format from the file extension.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedFormat` for anything but `.yaml`, `.yml`
    /// or `.json`, `Error::FileReadFailed` if the file cannot be read, or the
    /// parse error.
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let parse: fn(&str) -> Result<Self> = match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml,
            "json" => Self::from_json,
            _ => return Err(Error::unsupported_format(path, extension)),
        };

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        parse(&contents).inspect_error(|e| {
            warn!(path = %path.display(), error = %e, "Snapshot did not parse");
        })
    }

    /// Copy every object into `store`.
    pub async fn load_into(self, store: &InMemoryClusterStore) {
        let (claims, nodes) = (self.node_claims.len(), self.nodes.len());
        for claim in self.node_claims {
            store.upsert_node_claim(claim).await;
        }
        for node in self.nodes {
            store.upsert_node(node).await;
        }
        info!(node_claims = claims, nodes, "Loaded cluster snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
nodeClaims:
  - name: default-x7k2p
    providerId: aws:///us-west-2a/i-0abc
    phase: Initialized
  - name: default-pending
nodes:
  - name: ip-10-0-0-1
    providerId: aws:///us-west-2a/i-0abc
    taints:
      - key: node.kubernetes.io/unreachable
        effect: NoExecute
        timeAdded: "2024-05-01T12:00:00Z"
"#;

    #[test]
    fn yaml_snapshot_parses() {
        let snapshot = Snapshot::from_yaml(YAML);
        assert!(snapshot.is_ok());
        let Ok(snapshot) = snapshot else { return };

        assert_eq!(snapshot.node_claims.len(), 2);
        assert_eq!(
            snapshot.node_claims[0].provider_id(),
            Some("aws:///us-west-2a/i-0abc")
        );
        assert_eq!(snapshot.node_claims[1].provider_id(), None);
        assert_eq!(snapshot.nodes[0].taints.len(), 1);
        assert!(snapshot.nodes[0].taints[0].is_unreachable());
        assert!(snapshot.nodes[0].taints[0].time_added.is_some());
    }

    #[test]
    fn json_snapshot_parses() {
        let snapshot = Snapshot::from_json(
            r#"{"nodeClaims":[{"name":"a","providerId":"p"}],"nodes":[{"name":"n","providerId":"p"}]}"#,
        );
        assert!(snapshot.is_ok());
        let Ok(snapshot) = snapshot else { return };
        assert_eq!(snapshot.node_claims[0].name, "a");
        assert!(snapshot.nodes[0].taints.is_empty());
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let result = Snapshot::from_yaml("nodeClaims: [");
        assert!(matches!(result, Err(Error::YamlParseFailed { .. })));
    }

    #[test]
    fn unknown_extension_is_rejected_before_reading() {
        let result = Snapshot::load(Path::new("/nonexistent/cluster.txt"));
        assert!(matches!(result, Err(Error::UnsupportedFormat { .. })));
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = Snapshot::load(Path::new("/nonexistent/cluster.yaml"));
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }

    #[tokio::test]
    async fn load_into_populates_store() {
        let Ok(snapshot) = Snapshot::from_yaml(YAML) else {
            return;
        };
        let store = InMemoryClusterStore::new();
        snapshot.load_into(&store).await;

        assert_eq!(store.node_claim_count().await, 2);
        assert!(store.contains_node_claim("default-x7k2p").await);
        assert_eq!(store.indexed_node_provider_ids().await, 1);
    }
}
