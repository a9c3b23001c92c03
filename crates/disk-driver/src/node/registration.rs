use crate::{
  cluster::{
    ClusterNode, ClusterNodeDirectory, DISK_TYPE_LABEL_PREFIX, INSTANCE_TYPE_LABEL,
    MAX_VOLUMES_LABEL, TOPOLOGY_REGION_KEY, TOPOLOGY_ZONE_KEY,
  },
  config::{BackoffConfig, DriverConfig},
  error::{Context, DriverError},
  storage::StorageService,
};
use csi_proto::volume::Topology;
use std::{
  collections::BTreeMap,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Where a node sits and how many volumes it takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTopology {
  pub region: String,
  pub zone: String,
  pub max_volumes: u64,
}

impl NodeTopology {
  /// Reads the topology written by an earlier registration. `None` until
  /// both the zone and the volume limit are labelled.
  pub fn from_labels(node: &ClusterNode) -> Option<Self> {
    let zone = node.zone()?;
    let max_volumes = node.label(MAX_VOLUMES_LABEL)?.parse().ok()?;

    Some(NodeTopology {
      region: node.label(TOPOLOGY_REGION_KEY).unwrap_or_default().to_owned(),
      zone: zone.to_owned(),
      max_volumes,
    })
  }

  /// Accessible topology segments, leaving out unknown values.
  pub fn segments(&self) -> Topology {
    let mut topology = Topology::new();
    if !self.region.is_empty() {
      topology.insert(TOPOLOGY_REGION_KEY.to_owned(), self.region.clone());
    }
    if !self.zone.is_empty() {
      topology.insert(TOPOLOGY_ZONE_KEY.to_owned(), self.zone.clone());
    }
    topology
  }
}

/// Publishes what the backend knows about this node's instance as labels on
/// the cluster node, and caches the resulting topology.
#[derive(Clone)]
pub struct NodeRegistrar {
  storage: Arc<dyn StorageService>,
  directory: Arc<dyn ClusterNodeDirectory>,
  node_id: String,
  node_name: String,
  backoff: BackoffConfig,
  cache: Arc<RwLock<Option<NodeTopology>>>,
  registering: Arc<AtomicBool>,
}

impl NodeRegistrar {
  pub fn new(
    config: &DriverConfig,
    storage: Arc<dyn StorageService>,
    directory: Arc<dyn ClusterNodeDirectory>,
  ) -> Self {
    NodeRegistrar {
      storage,
      directory,
      node_id: config.node_id.clone(),
      node_name: config.node_name.clone(),
      backoff: config.registration_backoff,
      cache: Arc::new(RwLock::new(None)),
      registering: Arc::new(AtomicBool::new(false)),
    }
  }

  pub async fn cached(&self) -> Option<NodeTopology> {
    self.cache.read().await.clone()
  }

  /// The cached topology, or the one in the node's labels.
  pub async fn lookup(&self) -> Result<Option<NodeTopology>, DriverError> {
    if let Some(topology) = self.cached().await {
      return Ok(Some(topology));
    }

    let node = self
      .directory
      .get_node(&self.node_name)
      .await
      .context("get node", &self.node_name)?;

    let topology = NodeTopology::from_labels(&node);
    if let Some(topology) = &topology {
      *self.cache.write().await = Some(topology.clone());
    }

    Ok(topology)
  }

  /// Describes the instance and writes its labels, retrying the patch with
  /// exponential backoff.
  pub async fn register(&self) -> Result<NodeTopology, DriverError> {
    let instance = self
      .storage
      .describe_instance(&self.node_id)
      .await
      .context("describe instance", &self.node_id)?;

    let mut labels = BTreeMap::new();
    labels.insert(TOPOLOGY_REGION_KEY.to_owned(), instance.region.clone());
    labels.insert(TOPOLOGY_ZONE_KEY.to_owned(), instance.zone.clone());
    labels.insert(INSTANCE_TYPE_LABEL.to_owned(), instance.instance_type.clone());
    labels.insert(MAX_VOLUMES_LABEL.to_owned(), instance.max_volumes.to_string());
    for disk_type in &instance.disk_types {
      labels.insert(
        format!("{}{}", DISK_TYPE_LABEL_PREFIX, disk_type),
        "available".to_owned(),
      );
    }

    let steps = self.backoff.steps.max(1);
    for attempt in 0..steps {
      match self
        .directory
        .patch_node_labels(&self.node_name, &labels)
        .await
      {
        Ok(()) => break,
        Err(e) if attempt + 1 < steps => {
          let delay = self.backoff.delay(attempt);
          warn!(node = %self.node_name, attempt, error = %e, ?delay, "Patching node labels failed, retrying");
          tokio::time::sleep(delay).await;
        }
        Err(e) => return Err(e).context("patch labels of node", &self.node_name),
      }
    }

    let topology = NodeTopology {
      region: instance.region,
      zone: instance.zone,
      max_volumes: instance.max_volumes,
    };
    *self.cache.write().await = Some(topology.clone());

    info!(node = %self.node_name, instance_id = %self.node_id, zone = %topology.zone, "Registered node");
    Ok(topology)
  }

  /// Runs [`register`](Self::register) on a background task, unless one is
  /// already running.
  pub fn spawn_registration(&self) {
    if self.registering.swap(true, Ordering::SeqCst) {
      return;
    }

    let registrar = self.clone();
    tokio::spawn(async move {
      if let Err(e) = registrar.register().await {
        error!(node = %registrar.node_name, error = %e, "Node registration failed");
      }
      registrar.registering.store(false, Ordering::SeqCst);
    });
  }
}
