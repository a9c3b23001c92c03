use crate::{
  capacity::{allocate_gib, GIB},
  check_capability,
  cluster::{ClusterNodeDirectory, TOPOLOGY_REGION_KEY, TOPOLOGY_ZONE_KEY},
  config::{ConfigError, DriverConfig},
  error::{Context, DriverError},
  params::VolumeParameters,
  scheduler::ZoneScheduler,
  storage::{
    BackendVolume, CreateDiskRequest, StorageError, StorageService, VolumeAction, VolumeStatus,
    CREATOR_TAG,
  },
  waiter::StatusWaiter,
  PluginIdentity, CONTEXT_TYPE_KEY, CONTEXT_ZONE_KEY, PUBLISH_MOUNT_POINT_KEY,
};
use async_trait::async_trait;
use csi_proto::{
  controller::{
    Confirmed, ControllerCapabilities, ControllerExpandVolumeError, ControllerExpandVolumeRequest,
    ControllerExpandVolumeResponse, ControllerGetVolumeError, ControllerGetVolumeRequest,
    ControllerGetVolumeResponse, ControllerPublishVolumeError, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeError,
    ControllerUnpublishVolumeRequest, CreateVolumeError, CreateVolumeRequest, DeleteVolumeError,
    DeleteVolumeRequest, ListVolumesError, ListVolumesRequest, ListVolumesResponse,
    ValidateVolumeCapabilitiesError, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, VolumeListEntry,
  },
  volume::{Topology, TopologyRequirement, Volume, VolumeCondition},
  ControllerService,
};
use std::{collections::HashMap, sync::Arc, time::SystemTime};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// The cluster level half of the driver: provisioning and attachment.
///
/// No volume state is kept between calls. Every decision re-reads the
/// volume from the backend, which is what makes retried and concurrent
/// duplicate calls safe.
pub struct ControllerDriver {
  identity: PluginIdentity,
  config: DriverConfig,
  storage: Arc<dyn StorageService>,
  directory: Arc<dyn ClusterNodeDirectory>,
  waiter: StatusWaiter,
  scheduler: ZoneScheduler,
  expand_lock: Mutex<()>,
}

identity_service!(ControllerDriver);

fn publish_response(mount_point: &str) -> ControllerPublishVolumeResponse {
  let mut context = HashMap::new();
  context.insert(PUBLISH_MOUNT_POINT_KEY.to_owned(), mount_point.to_owned());
  ControllerPublishVolumeResponse::new(context)
}

fn attached_nodes(volume: &BackendVolume) -> Vec<String> {
  volume
    .attachments
    .iter()
    .map(|a| a.instance_id.clone())
    .collect()
}

impl ControllerDriver {
  pub fn new(
    config: DriverConfig,
    storage: Arc<dyn StorageService>,
    directory: Arc<dyn ClusterNodeDirectory>,
  ) -> Result<Self, ConfigError> {
    config.validate()?;

    Ok(ControllerDriver {
      identity: PluginIdentity::new(&config),
      waiter: StatusWaiter::new(&config.waiter),
      scheduler: ZoneScheduler::new(),
      expand_lock: Mutex::new(()),
      config,
      storage,
      directory,
    })
  }

  fn csi_volume(&self, id: &str, size_gb: u64, disk_type: &str, zone: &str) -> Volume {
    let mut context = HashMap::new();
    context.insert(CONTEXT_TYPE_KEY.to_owned(), disk_type.to_owned());
    context.insert(CONTEXT_ZONE_KEY.to_owned(), zone.to_owned());

    let mut topology = Topology::new();
    if !self.config.region.is_empty() {
      topology.insert(TOPOLOGY_REGION_KEY.to_owned(), self.config.region.clone());
    }
    topology.insert(TOPOLOGY_ZONE_KEY.to_owned(), zone.to_owned());

    Volume::new(id, size_gb * GIB)
      .with_context(context)
      .with_accessible_topology(topology)
  }

  #[inline]
  fn to_csi_volume(&self, volume: &BackendVolume) -> Volume {
    self.csi_volume(&volume.id, volume.size_gb, &volume.disk_type, &volume.zone)
  }

  /// Looks for a volume left behind by an earlier attempt to create `name`.
  async fn find_existing(
    &self,
    name: &str,
    size_gb: u64,
  ) -> Result<Option<BackendVolume>, CreateVolumeError> {
    let mut existing: Vec<BackendVolume> = self
      .storage
      .find_volumes_by_name(name)
      .await
      .context("find volumes named", name)?
      .into_iter()
      .filter(|v| v.status != VolumeStatus::Deleting)
      .collect();

    let volume = match existing.len() {
      0 => return Ok(None),
      1 => existing.remove(0),
      _ => self.resolve_duplicates(name, size_gb, existing).await?,
    };

    if volume.status == VolumeStatus::Error {
      return Err(
        DriverError::Inconsistent {
          volume_id: volume.id,
          reason: format!("an earlier create of {} left it in error state", name),
        }
        .into(),
      );
    }

    if volume.size_gb != size_gb {
      return Err(CreateVolumeError::AlreadyExists(format!(
        "volume {} named {} has {}Gi, requested {}Gi",
        volume.id, name, volume.size_gb, size_gb
      )));
    }

    info!(volume_id = %volume.id, name, status = %volume.status, "Volume already exists");
    Ok(Some(volume))
  }

  /// The backend sometimes creates a volume twice when a retried create
  /// races a slow one. Copies we created ourselves within the duplicate
  /// window, with the requested size, are removed once the backend lets
  /// them be deleted. Anything else needs an operator.
  async fn resolve_duplicates(
    &self,
    name: &str,
    size_gb: u64,
    mut volumes: Vec<BackendVolume>,
  ) -> Result<BackendVolume, DriverError> {
    let now = SystemTime::now();
    let window = self.config.duplicate_window;
    let removable = |v: &BackendVolume| {
      v.created_by(&self.config.name)
        && v.size_gb == size_gb
        && now
          .duration_since(v.created_at)
          .map(|age| age < window)
          .unwrap_or(true)
    };

    volumes.sort_by_key(|v| v.created_at);
    let (mut keep, mut remove): (Vec<_>, Vec<_>) =
      volumes.into_iter().partition(|v| !removable(v));

    if keep.len() > 1 {
      let ids = keep.iter().map(|v| v.id.as_str()).collect::<Vec<_>>();
      error!(name, volume_ids = ?ids, "Duplicate volumes cannot be cleaned up automatically");
      return Err(DriverError::DuplicateVolume {
        name: name.to_owned(),
        count: ids.len() + remove.len(),
      });
    }

    let keep = match keep.pop() {
      Some(volume) => volume,
      None => remove.remove(0),
    };

    if keep.status == VolumeStatus::Error {
      error!(name, volume_id = %keep.id, "Duplicate volumes next to one in error state");
      return Err(DriverError::DuplicateVolume {
        name: name.to_owned(),
        count: remove.len() + 1,
      });
    }

    if let Some(busy) = remove
      .iter()
      .find(|v| !v.status.permits(VolumeAction::Delete))
    {
      warn!(volume_id = %busy.id, status = %busy.status, name, "Duplicate volume cannot be deleted yet");
      return Err(DriverError::InvalidState {
        volume_id: busy.id.clone(),
        status: busy.status,
        action: VolumeAction::Delete,
      });
    }

    for duplicate in remove {
      warn!(volume_id = %duplicate.id, kept = %keep.id, name, "Deleting duplicate volume");
      match self.storage.delete_volume(&duplicate.id).await {
        Err(e) if e.is_not_found() => (),
        result => result.context("delete duplicate volume", &duplicate.id)?,
      }
    }

    Ok(keep)
  }

  async fn select_zone(
    &self,
    params: &VolumeParameters,
    requirements: Option<&TopologyRequirement>,
  ) -> Result<String, DriverError> {
    if let Some(zone) = &params.zone {
      return Ok(zone.clone());
    }

    let requested = requirements.and_then(|r| {
      r.preferred()
        .iter()
        .chain(r.requisite())
        .find_map(|segments| segments.get(TOPOLOGY_ZONE_KEY))
    });
    if let Some(zone) = requested {
      return Ok(zone.clone());
    }

    self
      .scheduler
      .next_zone(
        &*self.directory,
        &self.config.node_role,
        &params.storage_class_key(),
      )
      .await
  }

  /// Tries each disk type in turn until the backend accepts one.
  async fn create_disk(
    &self,
    name: &str,
    size_gb: u64,
    zone: &str,
    params: &VolumeParameters,
  ) -> Result<(String, String), DriverError> {
    let mut tags = params.tags.clone();
    tags.insert(CREATOR_TAG.to_owned(), self.config.name.clone());

    let mut last_error = StorageError::Rejected("no disk type to try".into());
    for disk_type in &params.disk_types {
      let request = CreateDiskRequest {
        name: name.to_owned(),
        size_gb,
        disk_type: disk_type.clone(),
        zone: zone.to_owned(),
        region: self.config.region.clone(),
        project_id: params
          .project_id
          .clone()
          .or_else(|| self.config.project_id.clone()),
        charge_type: params.charge_type.map(|c| c.as_str().to_owned()),
        purchase_time: params.purchase_time,
        performance_level: params.performance_level.map(|l| l.to_string()),
        tags: tags.clone(),
      };

      match self.storage.create_volume(request).await {
        Ok(id) => return Ok((id, disk_type.clone())),
        Err(e) if e.is_rejected() => {
          warn!(name, disk_type = %disk_type, error = %e, "Backend rejected volume type");
          last_error = e;
        }
        Err(e) => return Err(e).context("create volume", name),
      }
    }

    Err(last_error).context("create volume", name)
  }

  async fn node_condition(&self, instance_ids: &[String]) -> Result<VolumeCondition, DriverError> {
    for instance_id in instance_ids {
      let node = self
        .directory
        .find_node_by_instance(instance_id)
        .await
        .context("find node running instance", instance_id)?;

      match node {
        None => {
          return Ok(VolumeCondition::abnormal(format!(
            "No cluster node runs instance {}",
            instance_id
          )))
        }
        Some(node) if !node.ready => {
          return Ok(VolumeCondition::abnormal(format!(
            "Node {} is not ready",
            node.name
          )))
        }
        Some(_) => (),
      }
    }

    Ok(VolumeCondition::normal("Volume is attached to a ready node"))
  }
}

#[async_trait]
impl ControllerService for ControllerDriver {
  fn capabilities(&self) -> ControllerCapabilities {
    let mut capabilities = ControllerCapabilities::CREATE_DELETE_VOLUME
      | ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME
      | ControllerCapabilities::LIST_VOLUMES
      | ControllerCapabilities::LIST_VOLUMES_PUBLISHED_NODES
      | ControllerCapabilities::GET_VOLUME
      | ControllerCapabilities::VOLUME_CONDITION;

    if self.config.expand_enabled {
      capabilities |= ControllerCapabilities::EXPAND_VOLUME;
    }

    capabilities
  }

  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CreateVolumeError> {
    let name = request.name();
    for capability in request.volume_capabilities() {
      check_capability(capability)?;
    }

    if request.content_source().is_some() {
      return Err(
        tonic::Status::unimplemented("Creating volumes from snapshots or volumes is not supported")
          .into(),
      );
    }

    let range = request.capacity_range().ok_or_else(|| {
      tonic::Status::invalid_argument("CreateVolumeRequest.capacity_range is required")
    })?;
    let size_gb = allocate_gib(Some(range), &self.config.capacity).map_err(DriverError::from)?;
    let params = VolumeParameters::parse(request.parameters(), &self.config.default_disk_type)
      .map_err(DriverError::from)?;

    if let Some(volume) = self.find_existing(name, size_gb).await? {
      return Ok(self.to_csi_volume(&volume));
    }

    let zone = self
      .select_zone(&params, request.accessibility_requirements())
      .await?;
    let (volume_id, disk_type) = self.create_disk(name, size_gb, &zone, &params).await?;

    info!(volume_id = %volume_id, name, size_gb, disk_type = %disk_type, zone = %zone, "Created volume");
    Ok(self.csi_volume(&volume_id, size_gb, &disk_type, &zone))
  }

  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    let volume_id = request.volume_id();

    match self.storage.delete_volume(volume_id).await {
      Err(e) if e.is_not_found() => info!(volume_id, "Volume already deleted"),
      result => {
        result.context("delete volume", volume_id)?;
        info!(volume_id, "Deleted volume");
      }
    }

    Ok(())
  }

  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse, ControllerPublishVolumeError> {
    let volume_id = request.volume_id();
    let node_id = request.node_id();

    if request.readonly() {
      return Err(ControllerPublishVolumeError::Unsupported(
        "Read only publish is not supported".into(),
      ));
    }
    check_capability(request.volume_capability())?;

    let volume = match self.storage.get_volume(volume_id).await {
      Err(e) if e.is_not_found() => {
        return Err(ControllerPublishVolumeError::VolumeDoesNotExist(
          volume_id.into(),
        ))
      }
      result => result.context("get volume", volume_id)?,
    };

    if volume.status == VolumeStatus::InUse {
      match volume.attachment(node_id) {
        Some(attachment) => {
          info!(volume_id, node_id, "Volume already published to node");
          return Ok(publish_response(&attachment.mount_point));
        }
        None if volume.attachments.is_empty() => {
          error!(volume_id, "Volume is in use without any attachment");
          return Err(
            DriverError::Inconsistent {
              volume_id: volume_id.to_owned(),
              reason: "in use without any attachment".into(),
            }
            .into(),
          );
        }
        None => (),
      }
    }

    let attaching_here = volume.attachment(node_id).is_some();
    if !volume.attachments.is_empty() && !attaching_here && volume.status.permits(VolumeAction::Detach)
    {
      let stale = attached_nodes(&volume);
      warn!(volume_id, node_id, attached_to = ?stale, "Volume attached to another node, detaching");
      for instance_id in &stale {
        self
          .storage
          .detach(volume_id, instance_id)
          .await
          .context("detach stale attachment of", volume_id)?;
      }

      return Err(ControllerPublishVolumeError::PublishedToAnotherNode(format!(
        "volume {} is attached to {}, it is being detached, retry once it is available",
        volume_id,
        stale.join(", ")
      )));
    }

    let (validation, attached) = match futures::try_join!(
      self
        .storage
        .validate_attach_instance(node_id, &volume.disk_type),
      self.storage.describe_instance_volumes(node_id),
    ) {
      Err(e) if e.is_not_found() => {
        return Err(ControllerPublishVolumeError::NodeDoesNotExist(
          node_id.into(),
        ))
      }
      result => result.context("check attach limits of", node_id)?,
    };

    if !validation.supported {
      return Err(ControllerPublishVolumeError::MaxVolumesAttached(format!(
        "node {} cannot attach volumes of type {}",
        node_id, volume.disk_type
      )));
    }

    let already_counted = attached.iter().any(|id| id == volume_id);
    if !already_counted && attached.len() as u64 >= validation.max_volumes {
      return Err(ControllerPublishVolumeError::MaxVolumesAttached(format!(
        "node {} already has {} of {} volumes attached",
        node_id,
        attached.len(),
        validation.max_volumes
      )));
    }

    if !(attaching_here && volume.status == VolumeStatus::Attaching) {
      let volume = if volume.status == VolumeStatus::Available {
        volume
      } else {
        info!(volume_id, status = %volume.status, "Waiting for volume to become available");
        self
          .waiter
          .wait_for(&*self.storage, volume_id, VolumeStatus::Available)
          .await
          .map_err(DriverError::from)?
      };

      if !volume.status.permits(VolumeAction::Attach) {
        return Err(
          DriverError::InvalidState {
            volume_id: volume_id.to_owned(),
            status: volume.status,
            action: VolumeAction::Attach,
          }
          .into(),
        );
      }

      self
        .storage
        .attach(volume_id, node_id)
        .await
        .context("attach volume", volume_id)?;
      info!(volume_id, node_id, "Attach requested");
      tokio::time::sleep(self.config.attach_settle_delay).await;
    }

    let volume = self
      .waiter
      .wait_for(&*self.storage, volume_id, VolumeStatus::InUse)
      .await
      .map_err(DriverError::from)?;

    match volume.attachment(node_id) {
      Some(attachment) => {
        info!(volume_id, node_id, mount_point = %attachment.mount_point, "Volume published");
        Ok(publish_response(&attachment.mount_point))
      }
      None => Err(ControllerPublishVolumeError::PublishedToAnotherNode(format!(
        "volume {} was attached to {:?} instead of {}",
        volume_id,
        attached_nodes(&volume),
        node_id
      ))),
    }
  }

  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<(), ControllerUnpublishVolumeError> {
    let volume_id = request.volume_id();
    let node_id = request.node_id();

    let volume = match self.storage.get_volume(volume_id).await {
      Err(e) if e.is_not_found() => {
        info!(volume_id, "Volume is gone, nothing to detach");
        return Ok(());
      }
      result => result.context("get volume", volume_id)?,
    };

    if volume.status != VolumeStatus::InUse {
      info!(volume_id, status = %volume.status, "Volume is not in use, nothing to detach");
      return Ok(());
    }

    if volume.attachments.is_empty() {
      error!(volume_id, "Volume is in use without any attachment");
      return Err(ControllerUnpublishVolumeError::Inconsistent(format!(
        "volume {} is in use without any attachment",
        volume_id
      )));
    }

    if volume.attachment(node_id).is_none() {
      info!(volume_id, node_id, attached_to = ?attached_nodes(&volume), "Volume is attached to another node");
      return Ok(());
    }

    self
      .storage
      .detach(volume_id, node_id)
      .await
      .context("detach volume", volume_id)?;

    self
      .waiter
      .wait_until(&*self.storage, volume_id, "detached", |v| {
        !matches!(v.status, VolumeStatus::InUse | VolumeStatus::Detaching)
      })
      .await
      .map_err(DriverError::from)?;

    info!(volume_id, node_id, "Volume unpublished");
    Ok(())
  }

  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError> {
    let volume_id = request.volume_id();

    match self.storage.get_volume(volume_id).await {
      Err(e) if e.is_not_found() => {
        return Err(ValidateVolumeCapabilitiesError::VolumeNotFound(
          volume_id.into(),
        ))
      }
      result => result.context("get volume", volume_id)?,
    };

    for capability in request.volume_capabilities() {
      if let Err(status) = check_capability(capability) {
        return Ok(ValidateVolumeCapabilitiesResponse::Message(
          status.message().to_owned(),
        ));
      }
    }

    Ok(ValidateVolumeCapabilitiesResponse::Confirmed(
      Confirmed::new(
        Some(request.volume_context().clone()),
        request.volume_capabilities().to_vec(),
        Some(request.parameters().clone()),
      ),
    ))
  }

  async fn list_volumes(
    &self,
    request: ListVolumesRequest,
  ) -> Result<ListVolumesResponse, ListVolumesError> {
    if request.max_entries().is_some() || request.starting_token().is_some() {
      return Err(ListVolumesError::PaginationUnsupported);
    }

    let volumes = self
      .storage
      .list_volumes()
      .await
      .context("list volumes in region", &self.config.region)?;

    let entries = volumes
      .iter()
      .filter(|v| v.status != VolumeStatus::Deleting)
      .map(|v| {
        let (published, condition) = match v.status {
          VolumeStatus::Error => (
            Vec::new(),
            VolumeCondition::abnormal("Volume is in error state"),
          ),
          VolumeStatus::InUse => (attached_nodes(v), VolumeCondition::normal("Volume is in use")),
          status => (Vec::new(), VolumeCondition::normal(status.as_str())),
        };

        VolumeListEntry::new(
          self.to_csi_volume(v),
          Some(csi_proto::volume::VolumeStatus::new(
            published,
            Some(condition),
          )),
        )
      })
      .collect();

    Ok(ListVolumesResponse::new(entries))
  }

  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    if !self.config.expand_enabled {
      return Err(ControllerExpandVolumeError::Disabled);
    }

    let volume_id = request.volume_id();
    let size_gb = allocate_gib(Some(request.capacity_range()), &self.config.capacity)
      .map_err(DriverError::from)?;

    let _guard = self.expand_lock.lock().await;

    let volume = match self.storage.get_volume(volume_id).await {
      Err(e) if e.is_not_found() => {
        return Err(ControllerExpandVolumeError::VolumeNotFound(
          volume_id.into(),
        ))
      }
      result => result.context("get volume", volume_id)?,
    };

    if volume.size_gb >= size_gb {
      info!(volume_id, size_gb = volume.size_gb, "Volume is already large enough");
      return Ok(ControllerExpandVolumeResponse::new(
        volume.size_gb * GIB,
        true,
      ));
    }

    if !volume.status.permits(VolumeAction::Expand) {
      return Err(
        DriverError::InvalidState {
          volume_id: volume_id.to_owned(),
          status: volume.status,
          action: VolumeAction::Expand,
        }
        .into(),
      );
    }

    self
      .storage
      .expand_volume(volume_id, size_gb)
      .await
      .context("expand volume", volume_id)?;

    self
      .waiter
      .wait_until(&*self.storage, volume_id, "resized", |v| {
        v.status != VolumeStatus::Extending && v.size_gb >= size_gb
      })
      .await
      .map_err(DriverError::from)?;

    info!(volume_id, from_gb = volume.size_gb, to_gb = size_gb, "Expanded volume");
    Ok(ControllerExpandVolumeResponse::new(size_gb * GIB, true))
  }

  async fn controller_get_volume(
    &self,
    request: ControllerGetVolumeRequest,
  ) -> Result<ControllerGetVolumeResponse, ControllerGetVolumeError> {
    let volume_id = request.volume_id();

    let volume = match self.storage.get_volume(volume_id).await {
      Err(e) if e.is_not_found() => {
        return Err(ControllerGetVolumeError::VolumeNotFound(volume_id.into()))
      }
      result => result.context("get volume", volume_id)?,
    };

    let status = match volume.status {
      VolumeStatus::Error => csi_proto::volume::VolumeStatus::new(
        Vec::new(),
        Some(VolumeCondition::abnormal(format!(
          "Volume {} is in error state",
          volume_id
        ))),
      ),
      VolumeStatus::InUse => {
        let nodes = attached_nodes(&volume);
        let condition = self.node_condition(&nodes).await?;
        csi_proto::volume::VolumeStatus::new(nodes, Some(condition))
      }
      _ => csi_proto::volume::VolumeStatus::default(),
    };

    Ok(ControllerGetVolumeResponse::new(
      self.to_csi_volume(&volume),
      status,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    storage::Attachment,
    testing::{creator_tags, instance, FakeDirectory, FakeStorage, MOUNT_POINT},
  };
  use csi_proto::{
    proto,
    volume::{AccessMode, AccessType, MountVolume, VolumeCapability},
  };
  use std::{collections::BTreeMap, convert::TryFrom, time::Duration};
  use tonic::Code;

  const GIB_I64: i64 = 1 << 30;

  struct Fixture {
    driver: ControllerDriver,
    storage: Arc<FakeStorage>,
    directory: Arc<FakeDirectory>,
  }

  impl Fixture {
    fn new() -> Self {
      Self::with_config(DriverConfig {
        region: "region-1".into(),
        ..Default::default()
      })
    }

    fn with_config(config: DriverConfig) -> Self {
      let storage = Arc::new(FakeStorage::new());
      let directory = Arc::new(FakeDirectory::new());
      directory.add_node("node-a", Some("zone-a"), true);
      storage.add_instance("node-a", instance(&["cloud_ssd", "rssd"], 16), Vec::new());

      let driver =
        ControllerDriver::new(config, storage.clone(), directory.clone()).expect("valid config");
      Fixture {
        driver,
        storage,
        directory,
      }
    }
  }

  fn capability() -> proto::VolumeCapability {
    VolumeCapability::new(
      AccessMode::SingleNodeWriter,
      AccessType::Mount(MountVolume::default()),
    )
    .into()
  }

  fn create_request(name: &str, gib: i64, parameters: &[(&str, &str)]) -> CreateVolumeRequest {
    CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: name.into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: gib * GIB_I64,
        limit_bytes: 0,
      }),
      volume_capabilities: vec![capability()],
      parameters: parameters
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect(),
      ..Default::default()
    })
    .expect("valid request")
  }

  fn publish_request(volume_id: &str, node_id: &str) -> ControllerPublishVolumeRequest {
    ControllerPublishVolumeRequest::try_from(proto::ControllerPublishVolumeRequest {
      volume_id: volume_id.into(),
      node_id: node_id.into(),
      volume_capability: Some(capability()),
      ..Default::default()
    })
    .expect("valid request")
  }

  fn unpublish_request(volume_id: &str, node_id: &str) -> ControllerUnpublishVolumeRequest {
    ControllerUnpublishVolumeRequest::try_from(proto::ControllerUnpublishVolumeRequest {
      volume_id: volume_id.into(),
      node_id: node_id.into(),
      ..Default::default()
    })
    .expect("valid request")
  }

  fn expand_request(volume_id: &str, gib: i64) -> ControllerExpandVolumeRequest {
    ControllerExpandVolumeRequest::try_from(proto::ControllerExpandVolumeRequest {
      volume_id: volume_id.into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: gib * GIB_I64,
        limit_bytes: 0,
      }),
      ..Default::default()
    })
    .expect("valid request")
  }

  fn get_request(volume_id: &str) -> ControllerGetVolumeRequest {
    ControllerGetVolumeRequest::try_from(proto::ControllerGetVolumeRequest {
      volume_id: volume_id.into(),
    })
    .expect("valid request")
  }

  fn backend_volume(id: &str, age: Duration, tags: BTreeMap<String, String>) -> BackendVolume {
    BackendVolume {
      id: id.into(),
      name: "pvc-1".into(),
      size_gb: 20,
      status: VolumeStatus::Available,
      disk_type: "cloud_ssd".into(),
      zone: "zone-a".into(),
      attachments: Vec::new(),
      created_at: SystemTime::now() - age,
      tags,
    }
  }

  #[tokio::test]
  async fn create_is_idempotent() {
    let f = Fixture::new();

    let first = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect("created");
    let second = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect("created again");

    assert_eq!(first.volume_id(), second.volume_id());
    assert_eq!(second.capacity_bytes(), Some(20 * GIB));
    assert_eq!(f.storage.calls().create, 1);
  }

  #[tokio::test]
  async fn create_reports_disk_type_zone_and_topology() {
    let f = Fixture::new();

    let volume = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect("created");

    assert_eq!(
      volume.volume_context().get(CONTEXT_TYPE_KEY).map(String::as_str),
      Some("cloud_ssd")
    );
    assert_eq!(
      volume.volume_context().get(CONTEXT_ZONE_KEY).map(String::as_str),
      Some("zone-a")
    );
    let topology = &volume.accessible_topology()[0];
    assert_eq!(topology.get(TOPOLOGY_REGION_KEY).map(String::as_str), Some("region-1"));

    let created = f.storage.created();
    assert_eq!(created[0].size_gb, 20);
    assert_eq!(
      created[0].tags.get(CREATOR_TAG).map(String::as_str),
      Some("blockdisk.csi.io")
    );
  }

  #[tokio::test]
  async fn create_with_different_size_already_exists() {
    let f = Fixture::new();
    f.storage.insert_volume("pvc-1", 10, VolumeStatus::Available);

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect_err("size mismatch");

    assert!(matches!(err, CreateVolumeError::AlreadyExists(_)));
    assert_eq!(f.storage.calls().create, 0);
  }

  #[tokio::test]
  async fn create_over_errored_volume_is_internal() {
    let f = Fixture::new();
    f.storage.insert_volume("pvc-1", 20, VolumeStatus::Error);

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect_err("error state");

    assert_eq!(tonic::Status::from(err).code(), Code::Internal);
  }

  #[tokio::test]
  async fn create_removes_recent_duplicate() {
    let f = Fixture::new();
    f.storage
      .insert(backend_volume("vol-old", Duration::from_secs(600), BTreeMap::new()));
    f.storage.insert(backend_volume(
      "vol-new",
      Duration::from_secs(5),
      creator_tags("blockdisk.csi.io"),
    ));

    let volume = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect("duplicate resolved");

    assert_eq!(volume.volume_id(), "vol-old");
    assert_eq!(f.storage.deleted(), vec!["vol-new".to_owned()]);
    assert_eq!(f.storage.calls().create, 0);
  }

  #[tokio::test]
  async fn create_keeps_oldest_of_recent_duplicates() {
    let f = Fixture::new();
    f.storage.insert(backend_volume(
      "vol-b",
      Duration::from_secs(5),
      creator_tags("blockdisk.csi.io"),
    ));
    f.storage.insert(backend_volume(
      "vol-a",
      Duration::from_secs(10),
      creator_tags("blockdisk.csi.io"),
    ));

    let volume = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect("duplicate resolved");

    assert_eq!(volume.volume_id(), "vol-a");
    assert_eq!(f.storage.deleted(), vec!["vol-b".to_owned()]);
  }

  #[tokio::test]
  async fn create_with_old_duplicates_is_fatal() {
    let f = Fixture::new();
    f.storage
      .insert(backend_volume("vol-a", Duration::from_secs(600), BTreeMap::new()));
    f.storage.insert(backend_volume(
      "vol-b",
      Duration::from_secs(300),
      creator_tags("blockdisk.csi.io"),
    ));

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect_err("needs an operator");

    let status = tonic::Status::from(err);
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("pvc-1"));
    assert!(f.storage.deleted().is_empty());
  }

  #[tokio::test]
  async fn create_never_deletes_next_to_an_errored_duplicate() {
    let f = Fixture::new();
    f.storage.insert(BackendVolume {
      status: VolumeStatus::Error,
      ..backend_volume("vol-old", Duration::from_secs(600), BTreeMap::new())
    });
    f.storage.insert(BackendVolume {
      status: VolumeStatus::Creating,
      ..backend_volume(
        "vol-new",
        Duration::from_secs(5),
        creator_tags("blockdisk.csi.io"),
      )
    });

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect_err("needs an operator");

    let status = tonic::Status::from(err);
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("pvc-1"));
    assert!(f.storage.deleted().is_empty());
    assert!(f.storage.volume("vol-new").is_some());
  }

  #[tokio::test]
  async fn create_waits_for_duplicates_still_being_created() {
    let f = Fixture::new();
    f.storage.insert(backend_volume(
      "vol-a",
      Duration::from_secs(10),
      creator_tags("blockdisk.csi.io"),
    ));
    f.storage.insert(BackendVolume {
      status: VolumeStatus::Creating,
      ..backend_volume(
        "vol-b",
        Duration::from_secs(5),
        creator_tags("blockdisk.csi.io"),
      )
    });

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect_err("duplicate cannot be deleted yet");
    assert_eq!(tonic::Status::from(err).code(), Code::FailedPrecondition);
    assert!(f.storage.deleted().is_empty());

    f.storage.insert(backend_volume(
      "vol-b",
      Duration::from_secs(5),
      creator_tags("blockdisk.csi.io"),
    ));
    let volume = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect("duplicate resolved");

    assert_eq!(volume.volume_id(), "vol-a");
    assert_eq!(f.storage.deleted(), vec!["vol-b".to_owned()]);
  }

  #[tokio::test]
  async fn create_stops_at_transient_backend_errors() {
    let f = Fixture::new();
    f.storage
      .fail_next_create(StorageError::Backend("request timed out".into()));

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[("type", "rssd,cloud_ssd")]))
      .await
      .expect_err("outcome unknown");

    let status = tonic::Status::from(err);
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("timed out"));
    let tried: Vec<_> = f
      .storage
      .created()
      .into_iter()
      .map(|r| r.disk_type)
      .collect();
    assert_eq!(tried, vec!["rssd".to_owned()]);
  }

  #[tokio::test]
  async fn create_never_exceeds_the_limit() {
    let f = Fixture::new();
    let half = GIB_I64 + GIB_I64 / 2;
    let request = |required_bytes, limit_bytes| {
      CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
        name: "pvc-1".into(),
        capacity_range: Some(proto::CapacityRange {
          required_bytes,
          limit_bytes,
        }),
        volume_capabilities: vec![capability()],
        ..Default::default()
      })
      .expect("valid request")
    };

    let err = f
      .driver
      .create_volume(request(half, half))
      .await
      .expect_err("no whole GiB fits");
    assert_eq!(tonic::Status::from(err).code(), Code::OutOfRange);
    assert_eq!(f.storage.calls().create, 0);

    let volume = f
      .driver
      .create_volume(request(0, half))
      .await
      .expect("rounded down");
    assert_eq!(volume.capacity_bytes(), Some(GIB));
    assert_eq!(f.storage.created()[0].size_gb, 1);
  }

  #[tokio::test]
  async fn create_falls_through_rejected_disk_types() {
    let f = Fixture::new();
    f.storage.reject_type("rssd");

    let volume = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[("type", "rssd,cloud_ssd")]))
      .await
      .expect("second type accepted");

    let tried: Vec<_> = f
      .storage
      .created()
      .into_iter()
      .map(|r| r.disk_type)
      .collect();
    assert_eq!(tried, vec!["rssd".to_owned(), "cloud_ssd".to_owned()]);
    assert_eq!(
      volume.volume_context().get(CONTEXT_TYPE_KEY).map(String::as_str),
      Some("cloud_ssd")
    );
  }

  #[tokio::test]
  async fn create_fails_when_every_type_is_rejected() {
    let f = Fixture::new();
    f.storage.reject_type("rssd");

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[("type", "rssd")]))
      .await
      .expect_err("rejected");

    let status = tonic::Status::from(err);
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("sold out"));
  }

  #[tokio::test]
  async fn create_prefers_zone_parameter_then_topology() {
    let f = Fixture::new();

    f.driver
      .create_volume(create_request("pvc-1", 20, &[("zone", "zone-c")]))
      .await
      .expect("created");

    let mut segments = HashMap::new();
    segments.insert(TOPOLOGY_ZONE_KEY.to_owned(), "zone-b".to_owned());
    let request = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: "pvc-2".into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: 20 * GIB_I64,
        limit_bytes: 0,
      }),
      volume_capabilities: vec![capability()],
      accessibility_requirements: Some(proto::TopologyRequirement {
        requisite: Vec::new(),
        preferred: vec![proto::Topology { segments }],
      }),
      ..Default::default()
    })
    .expect("valid request");
    f.driver.create_volume(request).await.expect("created");

    let zones: Vec<_> = f.storage.created().into_iter().map(|r| r.zone).collect();
    assert_eq!(zones, vec!["zone-c".to_owned(), "zone-b".to_owned()]);
  }

  #[tokio::test]
  async fn create_without_zones_fails() {
    let f = Fixture::new();
    f.directory.insert_node(
      "node",
      crate::cluster::ClusterNode {
        name: "node-a".into(),
        instance_id: Some("node-a".into()),
        ..Default::default()
      },
    );

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[]))
      .await
      .expect_err("no zone");

    assert_eq!(tonic::Status::from(err).code(), Code::Internal);
    assert_eq!(f.storage.calls().create, 0);
  }

  #[tokio::test]
  async fn create_validates_capacity_and_parameters() {
    let f = Fixture::new();

    let no_range = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: "pvc-1".into(),
      volume_capabilities: vec![capability()],
      ..Default::default()
    })
    .expect("valid request");
    let err = f.driver.create_volume(no_range).await.expect_err("no range");
    assert_eq!(tonic::Status::from(err).code(), Code::InvalidArgument);

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 9000, &[]))
      .await
      .expect_err("too large");
    assert_eq!(tonic::Status::from(err).code(), Code::OutOfRange);

    let err = f
      .driver
      .create_volume(create_request("pvc-1", 20, &[("color", "blue")]))
      .await
      .expect_err("unknown parameter");
    assert_eq!(tonic::Status::from(err).code(), Code::InvalidArgument);

    assert_eq!(f.storage.calls().create, 0);
  }

  #[tokio::test]
  async fn delete_missing_volume_succeeds() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);

    for _ in 0..2 {
      f.driver
        .delete_volume(
          DeleteVolumeRequest::try_from(proto::DeleteVolumeRequest {
            volume_id: id.clone(),
            ..Default::default()
          })
          .expect("valid request"),
        )
        .await
        .expect("deleted");
    }

    assert_eq!(f.storage.deleted(), vec![id]);
  }

  #[tokio::test(start_paused = true)]
  async fn publish_twice_attaches_once() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);

    for _ in 0..2 {
      let response = f
        .driver
        .controller_publish_volume(publish_request(&id, "node-a"))
        .await
        .expect("published");
      assert_eq!(
        response
          .publish_context()
          .get(PUBLISH_MOUNT_POINT_KEY)
          .map(String::as_str),
        Some(MOUNT_POINT)
      );
    }

    assert_eq!(f.storage.calls().attach, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn publish_waits_for_available() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Creating);
    f.storage.script_status(
      &id,
      vec![
        Ok(VolumeStatus::Creating),
        Ok(VolumeStatus::Creating),
        Err(StorageError::Backend("throttled".into())),
        Ok(VolumeStatus::Available),
      ],
    );

    f.driver
      .controller_publish_volume(publish_request(&id, "node-a"))
      .await
      .expect("published");

    assert_eq!(f.storage.calls().attach, 1);
    assert_eq!(
      f.storage.volume(&id).map(|v| v.status),
      Some(VolumeStatus::InUse)
    );
  }

  #[tokio::test(start_paused = true)]
  async fn publish_times_out_when_never_available() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Creating);

    let err = f
      .driver
      .controller_publish_volume(publish_request(&id, "node-a"))
      .await
      .expect_err("stuck creating");

    assert_eq!(tonic::Status::from(err).code(), Code::Internal);
    assert_eq!(f.storage.calls().attach, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn publish_elsewhere_detaches_and_asks_for_retry() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);
    f.storage.attach_to(&id, "node-b");

    let err = f
      .driver
      .controller_publish_volume(publish_request(&id, "node-a"))
      .await
      .expect_err("attached elsewhere");

    assert!(matches!(
      err,
      ControllerPublishVolumeError::PublishedToAnotherNode(_)
    ));
    assert_eq!(f.storage.detached(), vec![(id, "node-b".to_owned())]);
    assert_eq!(f.storage.calls().attach, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn publish_checks_node_limits() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);
    f.storage
      .add_instance("node-b", instance(&["cloud_ssd"], 2), vec!["vol-x".into(), "vol-y".into()]);
    f.storage
      .add_instance("node-c", instance(&["rssd"], 16), Vec::new());

    let err = f
      .driver
      .controller_publish_volume(publish_request(&id, "node-b"))
      .await
      .expect_err("node full");
    assert_eq!(tonic::Status::from(err).code(), Code::ResourceExhausted);

    let err = f
      .driver
      .controller_publish_volume(publish_request(&id, "node-c"))
      .await
      .expect_err("type not supported");
    assert_eq!(tonic::Status::from(err).code(), Code::ResourceExhausted);

    let err = f
      .driver
      .controller_publish_volume(publish_request(&id, "node-z"))
      .await
      .expect_err("unknown node");
    assert!(matches!(err, ControllerPublishVolumeError::NodeDoesNotExist(_)));

    assert_eq!(f.storage.calls().attach, 0);
  }

  #[tokio::test]
  async fn publish_rejects_readonly_and_missing_volumes() {
    let f = Fixture::new();

    let readonly = ControllerPublishVolumeRequest::try_from(proto::ControllerPublishVolumeRequest {
      volume_id: "vol-1".into(),
      node_id: "node-a".into(),
      volume_capability: Some(capability()),
      readonly: true,
      ..Default::default()
    })
    .expect("valid request");
    let err = f
      .driver
      .controller_publish_volume(readonly)
      .await
      .expect_err("read only");
    assert!(matches!(err, ControllerPublishVolumeError::Unsupported(_)));

    let err = f
      .driver
      .controller_publish_volume(publish_request("vol-missing", "node-a"))
      .await
      .expect_err("missing");
    assert!(matches!(
      err,
      ControllerPublishVolumeError::VolumeDoesNotExist(_)
    ));
  }

  #[tokio::test]
  async fn unpublish_without_work_does_not_detach() {
    let f = Fixture::new();
    let available = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);
    let elsewhere = f.storage.insert_volume("pvc-2", 20, VolumeStatus::Available);
    f.storage.attach_to(&elsewhere, "node-b");

    for id in &["vol-missing".to_owned(), available, elsewhere] {
      f.driver
        .controller_unpublish_volume(unpublish_request(id, "node-a"))
        .await
        .expect("nothing to do");
    }

    assert_eq!(f.storage.calls().detach, 0);
  }

  #[tokio::test]
  async fn unpublish_detaches_from_node() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);
    f.storage.attach_to(&id, "node-a");

    f.driver
      .controller_unpublish_volume(unpublish_request(&id, "node-a"))
      .await
      .expect("unpublished");

    assert_eq!(f.storage.detached(), vec![(id.clone(), "node-a".to_owned())]);
    assert_eq!(
      f.storage.volume(&id).map(|v| v.status),
      Some(VolumeStatus::Available)
    );
  }

  #[tokio::test]
  async fn unpublish_in_use_without_attachment_is_inconsistent() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::InUse);

    let err = f
      .driver
      .controller_unpublish_volume(unpublish_request(&id, "node-a"))
      .await
      .expect_err("inconsistent");

    assert!(matches!(err, ControllerUnpublishVolumeError::Inconsistent(_)));
    assert_eq!(f.storage.calls().detach, 0);
  }

  #[tokio::test]
  async fn expand_grows_smaller_volume() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::InUse);

    let response = f
      .driver
      .controller_expand_volume(expand_request(&id, 40))
      .await
      .expect("expanded");

    assert_eq!(response.capacity_bytes(), 40 * GIB);
    assert!(response.node_expansion_required());
    assert_eq!(f.storage.volume(&id).map(|v| v.size_gb), Some(40));

    let response = f
      .driver
      .controller_expand_volume(expand_request(&id, 30))
      .await
      .expect("already large enough");
    assert_eq!(response.capacity_bytes(), 40 * GIB);
    assert_eq!(f.storage.calls().expand, 1);
  }

  #[tokio::test]
  async fn expand_reports_allocated_size() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);

    let request = ControllerExpandVolumeRequest::try_from(proto::ControllerExpandVolumeRequest {
      volume_id: id.clone(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: 30 * GIB_I64 + GIB_I64 / 2,
        limit_bytes: 0,
      }),
      ..Default::default()
    })
    .expect("valid request");
    let response = f
      .driver
      .controller_expand_volume(request)
      .await
      .expect("expanded");

    assert_eq!(response.capacity_bytes(), 31 * GIB);
    assert_eq!(f.storage.volume(&id).map(|v| v.size_gb), Some(31));
  }

  #[tokio::test]
  async fn expand_refuses_invalid_states() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Attaching);

    let err = f
      .driver
      .controller_expand_volume(expand_request(&id, 40))
      .await
      .expect_err("attaching");
    assert_eq!(tonic::Status::from(err).code(), Code::FailedPrecondition);

    let err = f
      .driver
      .controller_expand_volume(expand_request("vol-missing", 40))
      .await
      .expect_err("missing");
    assert!(matches!(err, ControllerExpandVolumeError::VolumeNotFound(_)));
    assert_eq!(f.storage.calls().expand, 0);
  }

  #[tokio::test]
  async fn expand_can_be_disabled() {
    let f = Fixture::with_config(DriverConfig {
      expand_enabled: false,
      ..Default::default()
    });
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);

    let err = f
      .driver
      .controller_expand_volume(expand_request(&id, 40))
      .await
      .expect_err("disabled");

    assert!(matches!(err, ControllerExpandVolumeError::Disabled));
    assert!(!f
      .driver
      .capabilities()
      .contains(ControllerCapabilities::EXPAND_VOLUME));
  }

  #[tokio::test]
  async fn get_volume_reports_node_condition() {
    let f = Fixture::new();
    let healthy = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);
    f.storage.attach_to(&healthy, "node-a");
    f.directory.add_node("node-b", Some("zone-a"), false);
    let degraded = f.storage.insert_volume("pvc-2", 20, VolumeStatus::Available);
    f.storage.attach_to(&degraded, "node-b");
    let errored = f.storage.insert_volume("pvc-3", 20, VolumeStatus::Error);

    let condition = |response: &ControllerGetVolumeResponse| {
      response
        .status()
        .volume_condition()
        .map(VolumeCondition::is_abnormal)
    };

    let response = f
      .driver
      .controller_get_volume(get_request(&healthy))
      .await
      .expect("volume");
    assert_eq!(
      response.status().published_node_ids().to_vec(),
      vec!["node-a".to_owned()]
    );
    assert_eq!(condition(&response), Some(false));

    let response = f
      .driver
      .controller_get_volume(get_request(&degraded))
      .await
      .expect("volume");
    assert_eq!(condition(&response), Some(true));

    let response = f
      .driver
      .controller_get_volume(get_request(&errored))
      .await
      .expect("volume");
    assert_eq!(condition(&response), Some(true));

    f.directory.insert_node(
      "storage",
      crate::cluster::ClusterNode {
        name: "node-x".into(),
        instance_id: Some("i-x".into()),
        ready: true,
        ..Default::default()
      },
    );
    let outside_role = f.storage.insert_volume("pvc-4", 20, VolumeStatus::Available);
    f.storage.attach_to(&outside_role, "i-x");
    let response = f
      .driver
      .controller_get_volume(get_request(&outside_role))
      .await
      .expect("volume");
    assert_eq!(condition(&response), Some(false));

    let err = f
      .driver
      .controller_get_volume(get_request("vol-missing"))
      .await
      .expect_err("missing");
    assert!(matches!(err, ControllerGetVolumeError::VolumeNotFound(_)));
  }

  #[tokio::test]
  async fn list_skips_deleting_volumes() {
    let f = Fixture::new();
    let attached = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);
    f.storage.insert(BackendVolume {
      attachments: vec![Attachment {
        instance_id: "node-a".into(),
        mount_point: MOUNT_POINT.into(),
      }],
      status: VolumeStatus::InUse,
      ..f.storage.volume(&attached).expect("inserted")
    });
    f.storage.insert_volume("pvc-2", 20, VolumeStatus::Deleting);

    let response = f
      .driver
      .list_volumes(
        ListVolumesRequest::try_from(proto::ListVolumesRequest::default()).expect("valid request"),
      )
      .await
      .expect("listed");

    assert_eq!(response.entries().len(), 1);
    let entry = &response.entries()[0];
    assert_eq!(entry.volume().volume_id(), attached);
    assert_eq!(
      entry.status().map(|s| s.published_node_ids().to_vec()),
      Some(vec!["node-a".to_owned()])
    );

    let paged = ListVolumesRequest::try_from(proto::ListVolumesRequest {
      max_entries: 10,
      starting_token: String::new(),
    })
    .expect("valid request");
    let err = f.driver.list_volumes(paged).await.expect_err("paged");
    assert!(matches!(err, ListVolumesError::PaginationUnsupported));
  }

  #[tokio::test]
  async fn validate_reports_unsupported_capabilities() {
    let f = Fixture::new();
    let id = f.storage.insert_volume("pvc-1", 20, VolumeStatus::Available);

    let request = |capability: proto::VolumeCapability| {
      ValidateVolumeCapabilitiesRequest::try_from(proto::ValidateVolumeCapabilitiesRequest {
        volume_id: id.clone(),
        volume_capabilities: vec![capability],
        ..Default::default()
      })
      .expect("valid request")
    };

    let response = f
      .driver
      .validate_volume_capabilities(request(capability()))
      .await
      .expect("validated");
    assert!(matches!(
      response,
      ValidateVolumeCapabilitiesResponse::Confirmed(_)
    ));

    let block = VolumeCapability::new(AccessMode::SingleNodeWriter, AccessType::Block).into();
    let response = f
      .driver
      .validate_volume_capabilities(request(block))
      .await
      .expect("validated");
    assert!(matches!(
      response,
      ValidateVolumeCapabilitiesResponse::Message(_)
    ));
  }
}
