use crate::{
  capacity::CapacityError,
  cluster::DirectoryError,
  params::ParameterError,
  storage::{StorageError, VolumeAction, VolumeStatus},
  waiter::WaitError,
};
use csi_mount_utils::MountError;
use csi_proto::{controller::*, node::*};
use thiserror::Error;

/// Failures inside the driver, carrying the operation and the identifiers
/// involved until they are turned into an RPC status.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DriverError {
  #[error("{op} {id}: {source}")]
  Storage {
    op: &'static str,
    id: String,
    source: StorageError,
  },

  #[error("{op} {id}: {source}")]
  Directory {
    op: &'static str,
    id: String,
    source: DirectoryError,
  },

  #[error("{op} {id}: {source}")]
  Mount {
    op: &'static str,
    id: String,
    source: MountError,
  },

  #[error(transparent)]
  Parameter(#[from] ParameterError),

  #[error(transparent)]
  Capacity(#[from] CapacityError),

  #[error(transparent)]
  Wait(#[from] WaitError),

  #[error("Volume {volume_id} is {status}, refusing to {action:?} it")]
  InvalidState {
    volume_id: String,
    status: VolumeStatus,
    action: VolumeAction,
  },

  #[error("Found {count} volumes named {name} that need manual cleanup")]
  DuplicateVolume { name: String, count: usize },

  #[error("Volume {volume_id} is in an inconsistent state: {reason}")]
  Inconsistent { volume_id: String, reason: String },

  #[error("No zone available for storage class {0}")]
  NoZone(String),
}

impl DriverError {
  pub fn is_not_found(&self) -> bool {
    match self {
      DriverError::Storage { source, .. } => source.is_not_found(),
      DriverError::Directory { source, .. } => matches!(source, DirectoryError::NodeNotFound(_)),
      DriverError::Mount { source, .. } => source.is_not_found(),
      _ => false,
    }
  }
}

impl From<DriverError> for tonic::Status {
  fn from(value: DriverError) -> Self {
    use tonic::{Code, Status};

    let code = match value {
      DriverError::Parameter(e) => return e.into(),
      DriverError::Capacity(e) => return e.into(),
      DriverError::Wait(e) => return e.into(),
      ref e if e.is_not_found() => Code::NotFound,
      DriverError::InvalidState { .. } => Code::FailedPrecondition,
      _ => Code::Internal,
    };

    Status::new(code, value.to_string())
  }
}

/// Attaches the operation and the identifier it worked on to a collaborator
/// error.
pub(crate) trait Context<T> {
  fn context(self, op: &'static str, id: &str) -> Result<T, DriverError>;
}

impl<T> Context<T> for Result<T, StorageError> {
  fn context(self, op: &'static str, id: &str) -> Result<T, DriverError> {
    self.map_err(|source| DriverError::Storage {
      op,
      id: id.to_owned(),
      source,
    })
  }
}

impl<T> Context<T> for Result<T, DirectoryError> {
  fn context(self, op: &'static str, id: &str) -> Result<T, DriverError> {
    self.map_err(|source| DriverError::Directory {
      op,
      id: id.to_owned(),
      source,
    })
  }
}

impl<T> Context<T> for Result<T, MountError> {
  fn context(self, op: &'static str, id: &str) -> Result<T, DriverError> {
    self.map_err(|source| DriverError::Mount {
      op,
      id: id.to_owned(),
      source,
    })
  }
}

macro_rules! into_rpc_error {
  ($($error:ty),* $(,)?) => {
    $(
      impl From<DriverError> for $error {
        #[inline]
        fn from(value: DriverError) -> Self {
          tonic::Status::from(value).into()
        }
      }
    )*
  };
}

into_rpc_error!(
  CreateVolumeError,
  DeleteVolumeError,
  ControllerPublishVolumeError,
  ControllerUnpublishVolumeError,
  ValidateVolumeCapabilitiesError,
  ListVolumesError,
  ControllerExpandVolumeError,
  ControllerGetVolumeError,
  NodeStageVolumeError,
  NodeUnstageVolumeError,
  NodePublishVolumeError,
  NodeUnpublishVolumeError,
  NodeExpandVolumeError,
  NodeGetVolumeStatsError,
  NodeGetInfoError,
);

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;
  use tonic::Code;

  #[test]
  fn storage_errors_keep_their_context() {
    let err = Err::<(), _>(StorageError::Backend("quota exceeded".into()))
      .context("attach volume", "vol-1")
      .expect_err("backend failed");

    assert_eq!(
      err.to_string(),
      "attach volume vol-1: Backend request failed: quota exceeded"
    );

    let status = tonic::Status::from(err);
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("vol-1"));
  }

  #[test]
  fn not_found_collaborator_errors_map_to_not_found() {
    let storage = Err::<(), _>(StorageError::NotFound("vol-1".into()))
      .context("get volume", "vol-1")
      .expect_err("missing");
    assert_eq!(tonic::Status::from(storage).code(), Code::NotFound);

    let node = Err::<(), _>(DirectoryError::NodeNotFound("node-a".into()))
      .context("get node", "node-a")
      .expect_err("missing");
    assert_eq!(tonic::Status::from(node).code(), Code::NotFound);

    let mount = Err::<(), _>(MountError::from(io::Error::from(io::ErrorKind::NotFound)))
      .context("stats", "/var/lib/kubelet/pods/a")
      .expect_err("missing");
    assert_eq!(tonic::Status::from(mount).code(), Code::NotFound);
  }

  #[test]
  fn state_errors_map_to_their_codes() {
    let invalid = DriverError::InvalidState {
      volume_id: "vol-1".into(),
      status: VolumeStatus::Extending,
      action: VolumeAction::Attach,
    };
    assert_eq!(tonic::Status::from(invalid).code(), Code::FailedPrecondition);

    let duplicate = DriverError::DuplicateVolume {
      name: "pvc-1".into(),
      count: 2,
    };
    assert_eq!(tonic::Status::from(duplicate).code(), Code::Internal);
  }

  #[test]
  fn rpc_errors_carry_the_status() {
    let err = CreateVolumeError::from(DriverError::NoZone("rssd".into()));
    let status = tonic::Status::from(err);

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "No zone available for storage class rssd");
  }
}
