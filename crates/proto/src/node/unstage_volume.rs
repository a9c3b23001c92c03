use crate::{
  proto,
  utils::{absolute_path, required},
};

use std::{
  convert::TryFrom,
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodeUnstageVolumeRequest {
  volume_id: String,
  staging_target_path: PathBuf,
}

impl NodeUnstageVolumeRequest {
  /// The ID of the volume. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The path at which the volume was staged. It MUST be an absolute
  /// path in the root filesystem of the process serving this request.
  #[inline]
  pub fn staging_target_path(&self) -> &Path {
    &self.staging_target_path
  }
}

impl TryFrom<proto::NodeUnstageVolumeRequest> for NodeUnstageVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnstageVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(value.volume_id, "NodeUnstageVolumeRequest.volume_id is empty")?;
    let staging_target_path = absolute_path(
      value.staging_target_path,
      "NodeUnstageVolumeRequest.staging_target_path is empty",
      "NodeUnstageVolumeRequest.staging_target_path is not absolute",
    )?;

    Ok(NodeUnstageVolumeRequest {
      volume_id,
      staging_target_path,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeUnstageVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeUnstageVolumeError> for tonic::Status {
  fn from(value: NodeUnstageVolumeError) -> Self {
    match value {
      NodeUnstageVolumeError::VolumeNotFound(v) => tonic::Status::not_found(v),
      NodeUnstageVolumeError::Other(v) => v,
    }
  }
}
