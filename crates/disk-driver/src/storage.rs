//! The remote block storage backend, as seen by the driver.

use async_trait::async_trait;
use std::{collections::BTreeMap, fmt, str::FromStr, time::SystemTime};
use thiserror::Error;

/// Tag put on every volume this driver creates. The value is the plugin name.
pub const CREATOR_TAG: &str = "created-by";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
  #[error("Resource not found: {0}")]
  NotFound(String),

  /// The backend answered and refused the request, e.g. a sold out disk
  /// type. Nothing was created.
  #[error("Backend rejected the request: {0}")]
  Rejected(String),

  /// Any other failure reported by the backend. The message is opaque and
  /// the request may still have taken effect.
  #[error("Backend request failed: {0}")]
  Backend(String),
}

impl StorageError {
  #[inline]
  pub fn is_not_found(&self) -> bool {
    matches!(self, StorageError::NotFound(_))
  }

  #[inline]
  pub fn is_rejected(&self) -> bool {
    matches!(self, StorageError::Rejected(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeStatus {
  Creating,
  Available,
  Attaching,
  InUse,
  Detaching,
  Extending,
  Deleting,
  Error,
}

/// Mutating requests the driver issues against a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAction {
  Attach,
  Detach,
  Expand,
  Delete,
}

impl VolumeStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      VolumeStatus::Creating => "creating",
      VolumeStatus::Available => "available",
      VolumeStatus::Attaching => "attaching",
      VolumeStatus::InUse => "in-use",
      VolumeStatus::Detaching => "detaching",
      VolumeStatus::Extending => "extending",
      VolumeStatus::Deleting => "deleting",
      VolumeStatus::Error => "error",
    }
  }

  /// Whether the backend accepts `action` for a volume in this status.
  ///
  /// | action | allowed from          |
  /// |--------|-----------------------|
  /// | attach | available             |
  /// | detach | in-use, attaching     |
  /// | expand | available, in-use     |
  /// | delete | available, error      |
  pub fn permits(self, action: VolumeAction) -> bool {
    use VolumeAction::*;
    use VolumeStatus::*;

    matches!(
      (action, self),
      (Attach, Available)
        | (Detach, InUse)
        | (Detach, Attaching)
        | (Expand, Available)
        | (Expand, InUse)
        | (Delete, Available)
        | (Delete, Error)
    )
  }
}

impl fmt::Display for VolumeStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
#[error("Unknown volume status '{0}'")]
pub struct ParseStatusError(String);

impl FromStr for VolumeStatus {
  type Err = ParseStatusError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "creating" => VolumeStatus::Creating,
      "available" => VolumeStatus::Available,
      "attaching" => VolumeStatus::Attaching,
      "in-use" | "inuse" => VolumeStatus::InUse,
      "detaching" => VolumeStatus::Detaching,
      "extending" => VolumeStatus::Extending,
      "deleting" => VolumeStatus::Deleting,
      "error" | "failed" => VolumeStatus::Error,
      other => return Err(ParseStatusError(other.to_owned())),
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
  pub instance_id: String,

  /// Device path the backend reports inside the instance.
  pub mount_point: String,
}

#[derive(Debug, Clone)]
pub struct BackendVolume {
  pub id: String,
  pub name: String,
  pub size_gb: u64,
  pub status: VolumeStatus,
  pub disk_type: String,
  pub zone: String,
  pub attachments: Vec<Attachment>,
  pub created_at: SystemTime,
  pub tags: BTreeMap<String, String>,
}

impl BackendVolume {
  /// The attachment for the given instance, if any.
  pub fn attachment(&self, instance_id: &str) -> Option<&Attachment> {
    self
      .attachments
      .iter()
      .find(|a| a.instance_id == instance_id)
  }

  pub fn created_by(&self, creator: &str) -> bool {
    self.tags.get(CREATOR_TAG).map(String::as_str) == Some(creator)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDiskRequest {
  pub name: String,
  pub size_gb: u64,
  pub disk_type: String,
  pub zone: String,
  pub region: String,
  pub project_id: Option<String>,
  pub charge_type: Option<String>,
  pub purchase_time: Option<u32>,
  pub performance_level: Option<String>,
  pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachValidation {
  /// The instance can mount a disk of the requested type.
  pub supported: bool,
  pub max_volumes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
  pub region: String,
  pub zone: String,
  pub instance_type: String,
  pub disk_types: Vec<String>,
  pub max_volumes: u64,
}

/// Client for the block storage backend. Every call is one signed request;
/// implementations handle transport retries themselves.
#[async_trait]
pub trait StorageService: Send + Sync + 'static {
  /// Creates a disk and returns its id.
  async fn create_volume(&self, request: CreateDiskRequest) -> Result<String, StorageError>;

  async fn delete_volume(&self, volume_id: &str) -> Result<(), StorageError>;

  async fn get_volume(&self, volume_id: &str) -> Result<BackendVolume, StorageError>;

  /// All volumes with exactly this name.
  async fn find_volumes_by_name(&self, name: &str) -> Result<Vec<BackendVolume>, StorageError>;

  async fn list_volumes(&self) -> Result<Vec<BackendVolume>, StorageError>;

  async fn expand_volume(&self, volume_id: &str, size_gb: u64) -> Result<(), StorageError>;

  async fn attach(&self, volume_id: &str, instance_id: &str) -> Result<(), StorageError>;

  async fn detach(&self, volume_id: &str, instance_id: &str) -> Result<(), StorageError>;

  async fn validate_attach_instance(
    &self,
    instance_id: &str,
    disk_type: &str,
  ) -> Result<AttachValidation, StorageError>;

  /// Ids of the volumes currently attached to the instance.
  async fn describe_instance_volumes(&self, instance_id: &str)
    -> Result<Vec<String>, StorageError>;

  async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo, StorageError>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("creating", VolumeStatus::Creating)]
  #[test_case("available", VolumeStatus::Available)]
  #[test_case("in-use", VolumeStatus::InUse)]
  #[test_case("inuse", VolumeStatus::InUse)]
  #[test_case("failed", VolumeStatus::Error)]
  fn parses_backend_status(raw: &str, expected: VolumeStatus) {
    assert_eq!(raw.parse::<VolumeStatus>().expect("known status"), expected);
  }

  #[test]
  fn unknown_status_is_an_error() {
    let err = "rebooting".parse::<VolumeStatus>().expect_err("unknown");
    assert_eq!(err.to_string(), "Unknown volume status 'rebooting'");
  }

  #[test]
  fn status_round_trips_through_display() {
    assert_eq!(VolumeStatus::InUse.to_string(), "in-use");
  }

  #[test_case(VolumeStatus::Available, VolumeAction::Attach, true)]
  #[test_case(VolumeStatus::InUse, VolumeAction::Attach, false)]
  #[test_case(VolumeStatus::Creating, VolumeAction::Attach, false)]
  #[test_case(VolumeStatus::InUse, VolumeAction::Detach, true)]
  #[test_case(VolumeStatus::Attaching, VolumeAction::Detach, true)]
  #[test_case(VolumeStatus::Available, VolumeAction::Detach, false)]
  #[test_case(VolumeStatus::InUse, VolumeAction::Expand, true)]
  #[test_case(VolumeStatus::Extending, VolumeAction::Expand, false)]
  #[test_case(VolumeStatus::Error, VolumeAction::Delete, true)]
  #[test_case(VolumeStatus::InUse, VolumeAction::Delete, false)]
  fn transition_table(status: VolumeStatus, action: VolumeAction, allowed: bool) {
    assert_eq!(status.permits(action), allowed);
  }
}
