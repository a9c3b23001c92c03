use super::Secrets;
use crate::{proto, utils::required};
use std::{collections::HashMap, convert::TryFrom};
use thiserror::Error;

#[derive(Debug)]
pub struct DeleteVolumeRequest {
  volume_id: String,
  secrets: Secrets,
}

impl DeleteVolumeRequest {
  /// The ID of the volume to be deprovisioned. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::DeleteVolumeRequest> for DeleteVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::DeleteVolumeRequest) -> Result<Self, Self::Error> {
    Ok(DeleteVolumeRequest {
      volume_id: required(value.volume_id, "DeleteVolumeRequest.volume_id is empty")?,
      secrets: value.secrets.into(),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DeleteVolumeError {
  /// Indicates that the volume corresponding to the specified `volume_id` could not be
  /// deleted because it is in use by another resource.
  #[error("Volume in use: {0}")]
  VolumeInUse(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<DeleteVolumeError> for tonic::Status {
  fn from(value: DeleteVolumeError) -> tonic::Status {
    use tonic::{Code, Status};

    match value {
      DeleteVolumeError::VolumeInUse(v) => Status::new(Code::FailedPrecondition, v),
      DeleteVolumeError::Other(v) => v,
    }
  }
}
