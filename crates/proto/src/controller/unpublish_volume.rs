use super::Secrets;
use crate::{proto, utils::required};
use std::{collections::HashMap, convert::TryFrom};
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerUnpublishVolumeRequest {
  volume_id: String,
  node_id: String,
  secrets: Secrets,
}

impl ControllerUnpublishVolumeRequest {
  /// The ID of the volume. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The ID of the node the volume should be detached from. The CO SHALL
  /// set this field to match the node ID returned by `NodeGetInfo`.
  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  /// Secrets required by plugin to complete controller unpublish volume
  /// request. This SHOULD be the same secrets passed to the
  /// ControllerPublishVolume call for the specified volume.
  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ControllerUnpublishVolumeRequest> for ControllerUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = required(
      value.volume_id,
      "ControllerUnpublishVolumeRequest.volume_id is empty",
    )?;
    let node_id = required(
      value.node_id,
      "ControllerUnpublishVolumeRequest.node_id is empty",
    )?;

    Ok(ControllerUnpublishVolumeRequest {
      volume_id,
      node_id,
      secrets: value.secrets.into(),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ControllerUnpublishVolumeError {
  /// Indicates that a node corresponding to the specified `node_id` does
  /// not exist and the volume corresponding to the specified `volume_id`
  /// is not assumed to be ControllerUnpublished from node.
  #[error("Node does not exist and volume not assumed ControllerUnpublished from node: {0}")]
  NodeNotFound(String),

  /// The backend reports the volume in use without any attachment. Retrying
  /// will not fix this, an operator has to look at the volume.
  #[error("Volume in inconsistent state: {0}")]
  Inconsistent(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ControllerUnpublishVolumeError> for tonic::Status {
  fn from(value: ControllerUnpublishVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      ControllerUnpublishVolumeError::Other(v) => v,
      value => {
        let code = match &value {
          ControllerUnpublishVolumeError::NodeNotFound(_) => Code::NotFound,
          _ => Code::Internal,
        };

        Status::new(code, value.to_string())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn node_id_is_required() {
    let err = ControllerUnpublishVolumeRequest::try_from(proto::ControllerUnpublishVolumeRequest {
      volume_id: "vol-1".into(),
      ..Default::default()
    })
    .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
    assert!(err.message().contains("node_id"));
  }

  #[test]
  fn inconsistent_state_is_internal() {
    let status: tonic::Status = ControllerUnpublishVolumeError::Inconsistent("vol-1".into()).into();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(status.message().contains("vol-1"));
  }
}
