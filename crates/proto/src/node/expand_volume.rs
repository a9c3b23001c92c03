use super::{CapacityRange, VolumeCapability};
use crate::{
  proto,
  utils::{absolute_path, required},
};
use std::{
  convert::{TryFrom, TryInto},
  num::NonZeroU64,
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodeExpandVolumeRequest {
  volume_id: String,
  volume_path: PathBuf,
  capacity_range: Option<CapacityRange>,
  staging_target_path: Option<PathBuf>,
  volume_capability: Option<VolumeCapability>,
}

impl NodeExpandVolumeRequest {
  /// The ID of the volume. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The path on which volume is available. This field is REQUIRED.
  #[inline]
  pub fn volume_path(&self) -> &Path {
    &self.volume_path
  }

  /// This allows CO to specify the capacity requirements of the volume
  /// after expansion. If capacity_range is omitted then a plugin MAY
  /// inspect the file system of the volume to determine the maximum
  /// capacity to which the volume can be expanded.
  #[inline]
  pub fn capacity_range(&self) -> Option<CapacityRange> {
    self.capacity_range
  }

  /// The path where the volume is staged, if the plugin has the
  /// STAGE_UNSTAGE_VOLUME capability, otherwise empty.
  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }

  /// Volume capability describing how the CO intends to use this volume.
  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::NodeExpandVolumeRequest> for NodeExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "NodeExpandVolumeRequest.volume_id is empty")?;
    let volume_path = absolute_path(
      value.volume_path,
      "NodeExpandVolumeRequest.volume_path is empty",
      "NodeExpandVolumeRequest.volume_path is not absolute",
    )?;

    let staging_target_path = match value.staging_target_path {
      v if v.is_empty() => None,
      v => Some(absolute_path(
        v,
        "NodeExpandVolumeRequest.staging_target_path is empty",
        "NodeExpandVolumeRequest.staging_target_path is not absolute",
      )?),
    };

    let capacity_range = CapacityRange::from_optional(value.capacity_range)?;
    let volume_capability = value.volume_capability.map(TryInto::try_into).transpose()?;

    Ok(NodeExpandVolumeRequest {
      volume_id,
      volume_path,
      capacity_range,
      staging_target_path,
      volume_capability,
    })
  }
}

#[derive(Debug)]
pub struct NodeExpandVolumeResponse {
  /// The capacity of the volume in bytes. This field is OPTIONAL.
  capacity_bytes: Option<NonZeroU64>,
}

impl NodeExpandVolumeResponse {
  pub fn new(capacity_bytes: Option<u64>) -> Self {
    NodeExpandVolumeResponse {
      capacity_bytes: capacity_bytes.and_then(NonZeroU64::new),
    }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> Option<u64> {
    self.capacity_bytes.map(NonZeroU64::get)
  }
}

impl TryFrom<NodeExpandVolumeResponse> for proto::NodeExpandVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeExpandVolumeResponse) -> Result<Self, Self::Error> {
    let capacity_bytes = value
      .capacity_bytes
      .map(|v| v.get() as i64)
      .unwrap_or_default();

    Ok(proto::NodeExpandVolumeResponse { capacity_bytes })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeExpandVolumeError {
  #[error("Exceeds capabilities: {0}")]
  ExceedsCapabilities(String),

  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error("Unsupported capacity_range: {0}")]
  UnsupportedCapacityRange(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeExpandVolumeError> for tonic::Status {
  fn from(value: NodeExpandVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      NodeExpandVolumeError::Other(v) => v,
      value => {
        let code = match &value {
          NodeExpandVolumeError::ExceedsCapabilities(_) => Code::InvalidArgument,
          NodeExpandVolumeError::VolumeNotFound(_) => Code::NotFound,
          NodeExpandVolumeError::UnsupportedCapacityRange(_) => Code::OutOfRange,
          NodeExpandVolumeError::Other(_) => unreachable!(),
        };

        Status::new(code, value.to_string())
      }
    }
  }
}
