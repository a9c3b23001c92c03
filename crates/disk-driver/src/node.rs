use crate::{
  check_capability,
  cluster::ClusterNodeDirectory,
  config::{ConfigError, DriverConfig},
  error::{Context, DriverError},
  storage::StorageService,
  PluginIdentity, CONTEXT_SKIP_FORMAT_KEY, CONTEXT_TYPE_KEY,
};
use async_trait::async_trait;
use csi_mount_utils::{MountError, Mounter};
use csi_proto::{
  node::{
    NodeCapabilities, NodeExpandVolumeError, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetInfoError, NodeGetInfoResponse, NodeGetVolumeStatsError, NodeGetVolumeStatsRequest,
    NodeGetVolumeStatsResponse, NodePublishVolumeError, NodePublishVolumeRequest,
    NodeStageVolumeError, NodeStageVolumeRequest, NodeUnpublishVolumeError,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeError, NodeUnstageVolumeRequest,
  },
  volume::{MountVolume, VolumeCondition, VolumeUsage, VolumeUsageUnit},
  NodeService,
};
use std::{io, path::PathBuf, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, warn};

mod device;
mod registration;

use device::DevicePaths;
pub use registration::{NodeRegistrar, NodeTopology};

/// The per node half of the driver: turns an attached block device into a
/// mounted filesystem at the paths the orchestrator asks for.
pub struct NodeDriver<M> {
  identity: PluginIdentity,
  config: DriverConfig,
  mounter: M,
  devices: DevicePaths,
  registrar: NodeRegistrar,

  /// Serializes format and mount decisions on this node.
  stage_lock: Mutex<()>,
}

identity_service!(impl<M: Mounter> NodeDriver<M>);

impl<M: Mounter> NodeDriver<M> {
  pub fn new(
    config: DriverConfig,
    mounter: M,
    storage: Arc<dyn StorageService>,
    directory: Arc<dyn ClusterNodeDirectory>,
  ) -> Result<Self, ConfigError> {
    config.validate()?;

    Ok(NodeDriver {
      identity: PluginIdentity::new(&config),
      devices: DevicePaths::new(&config.premium_disk_types)?,
      registrar: NodeRegistrar::new(&config, storage, directory),
      stage_lock: Mutex::new(()),
      config,
      mounter,
    })
  }

  #[inline]
  pub fn registrar(&self) -> &NodeRegistrar {
    &self.registrar
  }

  /// Resolves the device link of a volume. A link that is missing right
  /// after attach usually only needs udev to replay its events.
  async fn find_device(
    &self,
    volume_id: &str,
    disk_type: &str,
  ) -> Result<Option<PathBuf>, DriverError> {
    let device = self.devices.device_path(volume_id, disk_type);
    if self
      .mounter
      .path_exists(&device)
      .await
      .context("look up device of", volume_id)?
    {
      return Ok(Some(device));
    }

    warn!(volume_id, device = %device.display(), "Device link missing, triggering udev");
    self
      .mounter
      .trigger_udev()
      .await
      .context("trigger udev for", volume_id)?;
    tokio::time::sleep(self.config.udev_settle_delay).await;

    let exists = self
      .mounter
      .path_exists(&device)
      .await
      .context("look up device of", volume_id)?;
    Ok(if exists { Some(device) } else { None })
  }

  fn configured_topology(&self) -> NodeTopology {
    NodeTopology {
      region: self.config.region.clone(),
      zone: self.config.zone.clone().unwrap_or_default(),
      max_volumes: self.config.max_volumes_per_node,
    }
  }
}

fn mount_flags(mount: Option<&MountVolume>) -> Vec<String> {
  mount
    .map(|m| m.mount_flags().map(str::to_owned).collect())
    .unwrap_or_default()
}

#[async_trait]
impl<M: Mounter> NodeService for NodeDriver<M> {
  fn capabilities(&self) -> NodeCapabilities {
    let mut capabilities = NodeCapabilities::STAGE_UNSTAGE_VOLUME
      | NodeCapabilities::GET_VOLUME_STATS
      | NodeCapabilities::VOLUME_CONDITION;

    if self.config.expand_enabled {
      capabilities |= NodeCapabilities::EXPAND_VOLUME;
    }

    capabilities
  }

  async fn node_stage_volume(
    &self,
    request: NodeStageVolumeRequest,
  ) -> Result<(), NodeStageVolumeError> {
    let volume_id = request.volume_id();
    let staging = request.staging_target_path();
    let capability = request.volume_capability();
    check_capability(capability)?;

    let disk_type = request
      .volume_context()
      .get(CONTEXT_TYPE_KEY)
      .map(String::as_str)
      .filter(|t| !t.is_empty())
      .unwrap_or_else(|| self.config.default_disk_type.as_str());

    let device = match self.find_device(volume_id, disk_type).await? {
      Some(device) => device,
      None => {
        return Err(NodeStageVolumeError::VolumeNotFound(format!(
          "device of volume {} did not appear under /dev/disk/by-id",
          volume_id
        )))
      }
    };

    let mount = capability.access_type().mount();
    let fs_type = mount
      .and_then(MountVolume::fs_type)
      .unwrap_or_else(|| self.config.default_fs_type.as_str())
      .to_owned();
    let skip_format = request
      .volume_context()
      .get(CONTEXT_SKIP_FORMAT_KEY)
      .map(|v| v == "true")
      .unwrap_or(false);

    let _guard = self.stage_lock.lock().await;

    if !skip_format
      && !self
        .mounter
        .is_formatted(&device)
        .await
        .context("check format of", volume_id)?
    {
      info!(volume_id, device = %device.display(), fs_type = %fs_type, "Formatting device");
      self
        .mounter
        .format(&device, fs_type.as_str(), Vec::<String>::new())
        .await
        .context("format device of", volume_id)?;
    }

    if self
      .mounter
      .is_mounted(staging)
      .await
      .context("check staging mount of", volume_id)?
    {
      info!(volume_id, staging = %staging.display(), "Volume already staged");
      return Ok(());
    }

    self
      .mounter
      .mount(Some(&device), staging, fs_type.as_str(), mount_flags(mount))
      .await
      .context("mount staging path of", volume_id)?;

    info!(volume_id, device = %device.display(), staging = %staging.display(), "Volume staged");
    Ok(())
  }

  async fn node_unstage_volume(
    &self,
    request: NodeUnstageVolumeRequest,
  ) -> Result<(), NodeUnstageVolumeError> {
    let volume_id = request.volume_id();
    let staging = request.staging_target_path();

    let _guard = self.stage_lock.lock().await;

    if !self
      .mounter
      .is_mounted(staging)
      .await
      .context("check staging mount of", volume_id)?
    {
      info!(volume_id, staging = %staging.display(), "Volume not staged");
      return Ok(());
    }

    self
      .mounter
      .unmount(staging, None)
      .await
      .context("unmount staging path of", volume_id)?;

    info!(volume_id, staging = %staging.display(), "Volume unstaged");
    Ok(())
  }

  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError> {
    let volume_id = request.volume_id();
    let target = request.target_path();
    let staging = request.staging_target_path().ok_or_else(|| {
      NodePublishVolumeError::StagingTargetPathNotSet(format!(
        "volume {} must be staged before it is published",
        volume_id
      ))
    })?;
    let capability = request.volume_capability();
    check_capability(capability)?;

    if self
      .mounter
      .is_mounted(target)
      .await
      .context("check target mount of", volume_id)?
    {
      info!(volume_id, target = %target.display(), "Volume already published");
      return Ok(());
    }

    tokio::fs::create_dir_all(target)
      .await
      .map_err(MountError::from)
      .context("create target path of", volume_id)?;

    let mut options = vec!["bind".to_owned()];
    if request.readonly() {
      options.push("ro".to_owned());
    }
    options.extend(mount_flags(capability.access_type().mount()));

    self
      .mounter
      .mount(Some(staging), target, "", options)
      .await
      .context("bind mount target path of", volume_id)?;

    info!(volume_id, target = %target.display(), readonly = request.readonly(), "Volume published");
    Ok(())
  }

  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError> {
    let volume_id = request.volume_id();
    let target = request.target_path();

    if self
      .mounter
      .is_mounted(target)
      .await
      .context("check target mount of", volume_id)?
    {
      self
        .mounter
        .unmount(target, None)
        .await
        .context("unmount target path of", volume_id)?;
      info!(volume_id, target = %target.display(), "Volume unpublished");
    } else {
      info!(volume_id, target = %target.display(), "Volume not published");
    }

    match tokio::fs::remove_dir(target).await {
      Ok(()) => (),
      Err(e) if e.kind() == io::ErrorKind::NotFound => (),
      Err(e) => warn!(volume_id, target = %target.display(), error = %e, "Could not remove target path"),
    }

    Ok(())
  }

  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse, NodeGetVolumeStatsError> {
    let volume_id = request.volume_id();
    let path = request.volume_path();

    if !self
      .mounter
      .path_exists(path)
      .await
      .context("look up volume path of", volume_id)?
    {
      return Err(NodeGetVolumeStatsError::VolumeNotFound(format!(
        "volume path {} does not exist",
        path.display()
      )));
    }

    let condition = if self
      .mounter
      .is_mounted(path)
      .await
      .context("check mount of", volume_id)?
    {
      VolumeCondition::normal("Volume is mounted")
    } else {
      VolumeCondition::abnormal(format!("{} is not a mount point", path.display()))
    };

    let stats = self
      .mounter
      .stats(path)
      .await
      .context("read filesystem stats of", volume_id)?;

    Ok(NodeGetVolumeStatsResponse::new(
      vec![
        VolumeUsage::new(
          VolumeUsageUnit::Bytes,
          stats.total_bytes,
          stats.available_bytes,
          stats.used_bytes,
        ),
        VolumeUsage::new(
          VolumeUsageUnit::Inodes,
          stats.total_inodes,
          stats.free_inodes,
          stats.used_inodes,
        ),
      ],
      Some(condition),
    ))
  }

  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse, NodeExpandVolumeError> {
    let volume_id = request.volume_id();
    let volume_path = request.volume_path();

    if let Some(capability) = request.volume_capability() {
      check_capability(capability)?;
    }

    let device = match self
      .mounter
      .get_device_name_from_mount(volume_path)
      .await
      .context("find device of", volume_id)?
    {
      Some((device, _)) => device,
      None => {
        return Err(NodeExpandVolumeError::VolumeNotFound(format!(
          "nothing is mounted at {}",
          volume_path.display()
        )))
      }
    };

    let fs_type = match request
      .volume_capability()
      .and_then(|c| c.access_type().mount())
      .and_then(MountVolume::fs_type)
    {
      Some(fs_type) => Some(fs_type.to_owned()),
      None => self
        .mounter
        .get_disk_format(&device)
        .await
        .context("detect filesystem of", volume_id)?,
    };

    info!(volume_id, device = %device.display(), fs_type = ?fs_type, "Resizing filesystem");
    self
      .mounter
      .resize(fs_type, &device, volume_path)
      .await
      .context("resize filesystem of", volume_id)?;

    Ok(NodeExpandVolumeResponse::new(
      request.capacity_range().and_then(|r| r.required_bytes()),
    ))
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, NodeGetInfoError> {
    let topology = match self.registrar.lookup().await {
      Ok(Some(topology)) => topology,
      Ok(None) => {
        info!(node = %self.config.node_name, "Node is not registered yet, registering in background");
        self.registrar.spawn_registration();
        self.configured_topology()
      }
      Err(e) => {
        warn!(node = %self.config.node_name, error = %e, "Reading node labels failed, using configured topology");
        self.configured_topology()
      }
    };

    Ok(NodeGetInfoResponse::new(
      self.config.node_id.as_str(),
      topology.max_volumes,
      Some(topology.segments()),
    ))
  }
}
