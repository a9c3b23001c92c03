//! Node metadata kept by the container orchestrator.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

pub const TOPOLOGY_REGION_KEY: &str = "topology.blockdisk.csi.io/region";
pub const TOPOLOGY_ZONE_KEY: &str = "topology.blockdisk.csi.io/zone";
pub const INSTANCE_TYPE_LABEL: &str = "topology.blockdisk.csi.io/instance-type";
pub const MAX_VOLUMES_LABEL: &str = "topology.blockdisk.csi.io/max-volumes";

/// Prefix of the per disk type availability labels, e.g.
/// `disk.blockdisk.csi.io/rssd: "available"`.
pub const DISK_TYPE_LABEL_PREFIX: &str = "disk.blockdisk.csi.io/";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
  #[error("Node not found: {0}")]
  NodeNotFound(String),

  #[error("Cluster API request failed: {0}")]
  Api(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterNode {
  pub name: String,

  /// Backend instance id, taken from the node's provider id.
  pub instance_id: Option<String>,
  pub labels: BTreeMap<String, String>,

  /// The node's `Ready` condition.
  pub ready: bool,
}

impl ClusterNode {
  #[inline]
  pub fn label(&self, key: &str) -> Option<&str> {
    self
      .labels
      .get(key)
      .map(String::as_str)
      .filter(|v| !v.is_empty())
  }

  #[inline]
  pub fn zone(&self) -> Option<&str> {
    self.label(TOPOLOGY_ZONE_KEY)
  }
}

#[async_trait]
pub trait ClusterNodeDirectory: Send + Sync + 'static {
  async fn get_node(&self, name: &str) -> Result<ClusterNode, DirectoryError>;

  /// Nodes carrying the given role label.
  async fn list_nodes(&self, role: &str) -> Result<Vec<ClusterNode>, DirectoryError>;

  /// The node backed by a backend instance, whatever its role.
  async fn find_node_by_instance(
    &self,
    instance_id: &str,
  ) -> Result<Option<ClusterNode>, DirectoryError>;

  /// Merge patches the labels of a node. Existing labels not named here are
  /// left alone.
  async fn patch_node_labels(
    &self,
    name: &str,
    labels: &BTreeMap<String, String>,
  ) -> Result<(), DirectoryError>;
}
