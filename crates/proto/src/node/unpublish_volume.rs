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
pub struct NodeUnpublishVolumeRequest {
  volume_id: String,
  target_path: PathBuf,
}

impl NodeUnpublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The path at which the volume was published. It MUST be an absolute
  /// path in the root filesystem of the process serving this request.
  /// The SP MUST delete the file or directory it created at this path.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }
}

impl TryFrom<proto::NodeUnpublishVolumeRequest> for NodeUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(
      value.volume_id,
      "NodeUnpublishVolumeRequest.volume_id is empty",
    )?;
    let target_path = absolute_path(
      value.target_path,
      "NodeUnpublishVolumeRequest.target_path is empty",
      "NodeUnpublishVolumeRequest.target_path is not absolute",
    )?;

    Ok(NodeUnpublishVolumeRequest {
      volume_id,
      target_path,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeUnpublishVolumeError {
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeUnpublishVolumeError> for tonic::Status {
  fn from(value: NodeUnpublishVolumeError) -> Self {
    match value {
      NodeUnpublishVolumeError::VolumeNotFound(v) => tonic::Status::not_found(v),
      NodeUnpublishVolumeError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("vol-1", "/var/lib/kubelet/pods/x/mount" => None ; "valid")]
  #[test_case("", "/var/lib/kubelet/pods/x/mount" => Some("NodeUnpublishVolumeRequest.volume_id is empty".to_owned()) ; "missing volume id")]
  #[test_case("vol-1", "" => Some("NodeUnpublishVolumeRequest.target_path is empty".to_owned()) ; "missing target")]
  #[test_case("vol-1", "pods/x/mount" => Some("NodeUnpublishVolumeRequest.target_path is not absolute".to_owned()) ; "relative target")]
  fn validation(volume_id: &str, target_path: &str) -> Option<String> {
    NodeUnpublishVolumeRequest::try_from(proto::NodeUnpublishVolumeRequest {
      volume_id: volume_id.into(),
      target_path: target_path.into(),
    })
    .err()
    .map(|e| e.message().to_owned())
  }
}
