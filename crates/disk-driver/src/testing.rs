//! In-memory collaborators for the service tests.

use crate::{
  cluster::{
    ClusterNode, ClusterNodeDirectory, DirectoryError, MAX_VOLUMES_LABEL, TOPOLOGY_REGION_KEY,
    TOPOLOGY_ZONE_KEY,
  },
  storage::{
    AttachValidation, Attachment, BackendVolume, CreateDiskRequest, InstanceInfo, StorageError,
    StorageService, VolumeStatus, CREATOR_TAG,
  },
};
use async_trait::async_trait;
use std::{
  collections::{BTreeMap, HashMap, HashSet, VecDeque},
  sync::{Mutex, MutexGuard, PoisonError},
  time::SystemTime,
};

pub const MOUNT_POINT: &str = "/dev/vdb";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
  pub create: usize,
  pub delete: usize,
  pub get: usize,
  pub attach: usize,
  pub detach: usize,
  pub expand: usize,
}

#[derive(Default)]
struct FakeStorageInner {
  volumes: BTreeMap<String, BackendVolume>,
  scripts: HashMap<String, VecDeque<Result<VolumeStatus, StorageError>>>,
  rejected_types: HashSet<String>,
  create_failures: VecDeque<StorageError>,
  instances: HashMap<String, (InstanceInfo, Vec<String>)>,
  created: Vec<CreateDiskRequest>,
  deleted: Vec<String>,
  detached: Vec<(String, String)>,
  calls: Calls,
  next_id: usize,
}

/// A backend that completes every transition immediately, unless a status
/// progression has been scripted for the volume.
#[derive(Default)]
pub struct FakeStorage(Mutex<FakeStorageInner>);

impl FakeStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn inner(&self) -> MutexGuard<'_, FakeStorageInner> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn insert(&self, volume: BackendVolume) {
    self.inner().volumes.insert(volume.id.clone(), volume);
  }

  pub fn insert_volume(&self, name: &str, size_gb: u64, status: VolumeStatus) -> String {
    let id = {
      let mut inner = self.inner();
      inner.next_id += 1;
      format!("vol-pre{}", inner.next_id)
    };

    self.insert(BackendVolume {
      id: id.clone(),
      name: name.to_owned(),
      size_gb,
      status,
      disk_type: "cloud_ssd".into(),
      zone: "zone-a".into(),
      attachments: Vec::new(),
      created_at: SystemTime::now(),
      tags: BTreeMap::new(),
    });
    id
  }

  pub fn attach_to(&self, volume_id: &str, instance_id: &str) {
    if let Some(volume) = self.inner().volumes.get_mut(volume_id) {
      volume.status = VolumeStatus::InUse;
      volume.attachments = vec![Attachment {
        instance_id: instance_id.to_owned(),
        mount_point: MOUNT_POINT.into(),
      }];
    }
  }

  pub fn volume(&self, volume_id: &str) -> Option<BackendVolume> {
    self.inner().volumes.get(volume_id).cloned()
  }

  /// Statuses reported by the next `get_volume` calls for the volume. A
  /// scripted status is also stored on the volume.
  pub fn script_status(&self, volume_id: &str, script: Vec<Result<VolumeStatus, StorageError>>) {
    self
      .inner()
      .scripts
      .insert(volume_id.to_owned(), script.into_iter().collect());
  }

  pub fn reject_type(&self, disk_type: &str) {
    self.inner().rejected_types.insert(disk_type.to_owned());
  }

  /// The next create fails with `error`, whatever its disk type.
  pub fn fail_next_create(&self, error: StorageError) {
    self.inner().create_failures.push_back(error);
  }

  pub fn add_instance(&self, instance_id: &str, info: InstanceInfo, attached: Vec<String>) {
    self
      .inner()
      .instances
      .insert(instance_id.to_owned(), (info, attached));
  }

  pub fn calls(&self) -> Calls {
    self.inner().calls
  }

  pub fn created(&self) -> Vec<CreateDiskRequest> {
    self.inner().created.clone()
  }

  pub fn deleted(&self) -> Vec<String> {
    self.inner().deleted.clone()
  }

  pub fn detached(&self) -> Vec<(String, String)> {
    self.inner().detached.clone()
  }
}

fn not_found(id: &str) -> StorageError {
  StorageError::NotFound(id.to_owned())
}

#[async_trait]
impl StorageService for FakeStorage {
  async fn create_volume(&self, request: CreateDiskRequest) -> Result<String, StorageError> {
    let mut inner = self.inner();
    inner.calls.create += 1;
    inner.created.push(request.clone());

    if let Some(e) = inner.create_failures.pop_front() {
      return Err(e);
    }

    if inner.rejected_types.contains(&request.disk_type) {
      return Err(StorageError::Rejected(format!(
        "disk type {} is sold out",
        request.disk_type
      )));
    }

    inner.next_id += 1;
    let id = format!("vol-{}", inner.next_id);
    inner.volumes.insert(
      id.clone(),
      BackendVolume {
        id: id.clone(),
        name: request.name,
        size_gb: request.size_gb,
        status: VolumeStatus::Available,
        disk_type: request.disk_type,
        zone: request.zone,
        attachments: Vec::new(),
        created_at: SystemTime::now(),
        tags: request.tags,
      },
    );

    Ok(id)
  }

  async fn delete_volume(&self, volume_id: &str) -> Result<(), StorageError> {
    let mut inner = self.inner();
    inner.calls.delete += 1;
    inner
      .volumes
      .remove(volume_id)
      .ok_or_else(|| not_found(volume_id))?;
    inner.deleted.push(volume_id.to_owned());
    Ok(())
  }

  async fn get_volume(&self, volume_id: &str) -> Result<BackendVolume, StorageError> {
    let mut inner = self.inner();
    inner.calls.get += 1;

    let scripted = inner
      .scripts
      .get_mut(volume_id)
      .and_then(|script| script.pop_front());
    let status = match scripted {
      Some(Err(e)) => return Err(e),
      Some(Ok(status)) => Some(status),
      None => None,
    };

    let volume = inner
      .volumes
      .get_mut(volume_id)
      .ok_or_else(|| not_found(volume_id))?;
    if let Some(status) = status {
      volume.status = status;
    }

    Ok(volume.clone())
  }

  async fn find_volumes_by_name(&self, name: &str) -> Result<Vec<BackendVolume>, StorageError> {
    Ok(
      self
        .inner()
        .volumes
        .values()
        .filter(|v| v.name == name)
        .cloned()
        .collect(),
    )
  }

  async fn list_volumes(&self) -> Result<Vec<BackendVolume>, StorageError> {
    Ok(self.inner().volumes.values().cloned().collect())
  }

  async fn expand_volume(&self, volume_id: &str, size_gb: u64) -> Result<(), StorageError> {
    let mut inner = self.inner();
    inner.calls.expand += 1;
    let volume = inner
      .volumes
      .get_mut(volume_id)
      .ok_or_else(|| not_found(volume_id))?;
    volume.size_gb = size_gb;
    Ok(())
  }

  async fn attach(&self, volume_id: &str, instance_id: &str) -> Result<(), StorageError> {
    let mut inner = self.inner();
    inner.calls.attach += 1;
    let volume = inner
      .volumes
      .get_mut(volume_id)
      .ok_or_else(|| not_found(volume_id))?;
    volume.status = VolumeStatus::InUse;
    volume.attachments = vec![Attachment {
      instance_id: instance_id.to_owned(),
      mount_point: MOUNT_POINT.into(),
    }];
    Ok(())
  }

  async fn detach(&self, volume_id: &str, instance_id: &str) -> Result<(), StorageError> {
    let mut inner = self.inner();
    inner.calls.detach += 1;
    inner
      .detached
      .push((volume_id.to_owned(), instance_id.to_owned()));
    let volume = inner
      .volumes
      .get_mut(volume_id)
      .ok_or_else(|| not_found(volume_id))?;
    volume.status = VolumeStatus::Available;
    volume.attachments.clear();
    Ok(())
  }

  async fn validate_attach_instance(
    &self,
    instance_id: &str,
    disk_type: &str,
  ) -> Result<AttachValidation, StorageError> {
    let inner = self.inner();
    let (info, _) = inner
      .instances
      .get(instance_id)
      .ok_or_else(|| not_found(instance_id))?;

    Ok(AttachValidation {
      supported: info.disk_types.iter().any(|t| t == disk_type),
      max_volumes: info.max_volumes,
    })
  }

  async fn describe_instance_volumes(
    &self,
    instance_id: &str,
  ) -> Result<Vec<String>, StorageError> {
    let inner = self.inner();
    let (_, attached) = inner
      .instances
      .get(instance_id)
      .ok_or_else(|| not_found(instance_id))?;
    Ok(attached.clone())
  }

  async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo, StorageError> {
    let inner = self.inner();
    let (info, _) = inner
      .instances
      .get(instance_id)
      .ok_or_else(|| not_found(instance_id))?;
    Ok(info.clone())
  }
}

/// Tags marking a volume as created by the driver under test.
pub fn creator_tags(creator: &str) -> BTreeMap<String, String> {
  let mut tags = BTreeMap::new();
  tags.insert(CREATOR_TAG.to_owned(), creator.to_owned());
  tags
}

pub fn instance(disk_types: &[&str], max_volumes: u64) -> InstanceInfo {
  InstanceInfo {
    region: "region-1".into(),
    zone: "zone-a".into(),
    instance_type: "n2.large".into(),
    disk_types: disk_types.iter().map(|t| (*t).to_owned()).collect(),
    max_volumes,
  }
}

#[derive(Default)]
struct FakeDirectoryInner {
  nodes: BTreeMap<String, (String, ClusterNode)>,
  failing_patches: usize,
  patches: Vec<(String, BTreeMap<String, String>)>,
}

#[derive(Default)]
pub struct FakeDirectory(Mutex<FakeDirectoryInner>);

impl FakeDirectory {
  pub fn new() -> Self {
    Self::default()
  }

  fn inner(&self) -> MutexGuard<'_, FakeDirectoryInner> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Adds a node with the `node` role, backed by an instance of the same name.
  pub fn add_node(&self, name: &str, zone: Option<&str>, ready: bool) {
    let mut labels = BTreeMap::new();
    if let Some(zone) = zone {
      labels.insert(TOPOLOGY_ZONE_KEY.to_owned(), zone.to_owned());
    }

    self.insert_node(
      "node",
      ClusterNode {
        name: name.to_owned(),
        instance_id: Some(name.to_owned()),
        labels,
        ready,
      },
    );
  }

  pub fn insert_node(&self, role: &str, node: ClusterNode) {
    self
      .inner()
      .nodes
      .insert(node.name.clone(), (role.to_owned(), node));
  }

  /// Adds a node whose labels were already written by a registration.
  pub fn add_registered_node(&self, name: &str, region: &str, zone: &str, max_volumes: u64) {
    let mut labels = BTreeMap::new();
    labels.insert(TOPOLOGY_REGION_KEY.to_owned(), region.to_owned());
    labels.insert(TOPOLOGY_ZONE_KEY.to_owned(), zone.to_owned());
    labels.insert(MAX_VOLUMES_LABEL.to_owned(), max_volumes.to_string());

    self.insert_node(
      "node",
      ClusterNode {
        name: name.to_owned(),
        instance_id: Some(name.to_owned()),
        labels,
        ready: true,
      },
    );
  }

  /// The next `count` label patches fail.
  pub fn fail_patches(&self, count: usize) {
    self.inner().failing_patches = count;
  }

  pub fn patches(&self) -> Vec<(String, BTreeMap<String, String>)> {
    self.inner().patches.clone()
  }

  pub fn node(&self, name: &str) -> Option<ClusterNode> {
    self.inner().nodes.get(name).map(|(_, node)| node.clone())
  }
}

#[async_trait]
impl ClusterNodeDirectory for FakeDirectory {
  async fn get_node(&self, name: &str) -> Result<ClusterNode, DirectoryError> {
    self
      .node(name)
      .ok_or_else(|| DirectoryError::NodeNotFound(name.to_owned()))
  }

  async fn list_nodes(&self, role: &str) -> Result<Vec<ClusterNode>, DirectoryError> {
    Ok(
      self
        .inner()
        .nodes
        .values()
        .filter(|(r, _)| r == role)
        .map(|(_, node)| node.clone())
        .collect(),
    )
  }

  async fn find_node_by_instance(
    &self,
    instance_id: &str,
  ) -> Result<Option<ClusterNode>, DirectoryError> {
    Ok(
      self
        .inner()
        .nodes
        .values()
        .map(|(_, node)| node)
        .find(|node| node.instance_id.as_deref() == Some(instance_id))
        .cloned(),
    )
  }

  async fn patch_node_labels(
    &self,
    name: &str,
    labels: &BTreeMap<String, String>,
  ) -> Result<(), DirectoryError> {
    let mut inner = self.inner();
    inner.patches.push((name.to_owned(), labels.clone()));

    if inner.failing_patches > 0 {
      inner.failing_patches -= 1;
      return Err(DirectoryError::Api("conflict".into()));
    }

    let (_, node) = inner
      .nodes
      .get_mut(name)
      .ok_or_else(|| DirectoryError::NodeNotFound(name.to_owned()))?;
    node
      .labels
      .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
  }
}
