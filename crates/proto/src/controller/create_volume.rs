use super::{CapacityRange, Secrets, TopologyRequirement, VolumeCapability, VolumeContentSource};
use crate::{proto, utils::required};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct CreateVolumeRequest {
  name: String,
  capacity_range: Option<CapacityRange>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
  content_source: Option<VolumeContentSource>,
  accessibility_requirements: Option<TopologyRequirement>,
}

impl CreateVolumeRequest {
  /// The suggested name for the storage space. This field is REQUIRED.
  /// It serves two purposes:
  /// 1) Idempotency - This name is generated by the CO to achieve
  ///    idempotency. The Plugin SHOULD ensure that multiple
  ///    `CreateVolume` calls for the same name do not result in more
  ///    than one piece of storage provisioned corresponding to that
  ///    name. If a Plugin is unable to enforce idempotency, the CO's
  ///    error recovery logic could result in multiple (unused) volumes
  ///    being provisioned.
  /// 2) Suggested name - Some storage systems allow callers to specify
  ///    an identifier by which to refer to the newly provisioned
  ///    storage. If a storage system supports this, it can optionally
  ///    use this name as the identifier for the new volume.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// This field is OPTIONAL. This allows the CO to specify the capacity
  /// requirement of the volume to be provisioned. If not specified, the
  /// Plugin MAY choose an implementation-defined capacity range.
  #[inline]
  pub fn capacity_range(&self) -> Option<&CapacityRange> {
    self.capacity_range.as_ref()
  }

  /// The capabilities that the provisioned volume MUST have. SP MUST
  /// provision a volume that will satisfy ALL of the capabilities
  /// specified in this list. This field is REQUIRED.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  /// Plugin specific parameters passed in as opaque key-value pairs.
  /// This field is OPTIONAL.
  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  /// Secrets required by plugin to complete volume creation request.
  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  /// If specified, the new volume will be pre-populated with data from
  /// this source. This field is OPTIONAL.
  #[inline]
  pub fn content_source(&self) -> Option<&VolumeContentSource> {
    self.content_source.as_ref()
  }

  /// Specifies where (regions, zones, racks, etc.) the provisioned
  /// volume MUST be accessible from. This field is OPTIONAL.
  #[inline]
  pub fn accessibility_requirements(&self) -> Option<&TopologyRequirement> {
    self.accessibility_requirements.as_ref()
  }
}

impl TryFrom<proto::CreateVolumeRequest> for CreateVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateVolumeRequest) -> Result<Self, Self::Error> {
    let name = required(value.name, "CreateVolumeRequest.name is empty")?;
    let capacity_range = CapacityRange::from_optional(value.capacity_range)?;

    let volume_capabilities = match value.volume_capabilities {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "CreateVolumeRequest.volume_capabilities is empty",
        ))
      }
      v => v
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?,
    };

    let content_source = match value.volume_content_source {
      None => None,
      Some(v) => v.try_into()?,
    };

    Ok(CreateVolumeRequest {
      name,
      capacity_range,
      volume_capabilities,
      parameters: value.parameters,
      secrets: value.secrets.into(),
      content_source,
      accessibility_requirements: value.accessibility_requirements.map(Into::into),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CreateVolumeError {
  /// Indicates that a volume corresponding to the specified volume `name`
  /// already exists but is incompatible with the specified `capacity_range`,
  /// `volume_capabilities`, `parameters`, `accessibility_requirements` or
  /// `volume_content_source`.
  #[error("Volume already exists but is incompatible: {0}")]
  AlreadyExists(String),

  /// Indicates that the capacity range is not allowed by the Plugin.
  #[error("Unsupported capacity_range: {0}")]
  UnsupportedCapacityRange(String),

  /// Indicates that the Plugin is unable to provision the volume, for
  /// example because no zone or disk type is available.
  #[error("Resource exhausted: {0}")]
  ResourceExhausted(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<CreateVolumeError> for tonic::Status {
  fn from(value: CreateVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      CreateVolumeError::AlreadyExists(v) => Status::new(Code::AlreadyExists, v),
      CreateVolumeError::UnsupportedCapacityRange(v) => Status::new(Code::OutOfRange, v),
      CreateVolumeError::ResourceExhausted(v) => Status::new(Code::ResourceExhausted, v),
      CreateVolumeError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::volume::{AccessMode, AccessType, MountVolume};

  fn capability() -> proto::VolumeCapability {
    VolumeCapability::new(
      AccessMode::SingleNodeWriter,
      AccessType::Mount(MountVolume::default()),
    )
    .into()
  }

  #[test]
  fn requires_name_and_capabilities() {
    let err = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      volume_capabilities: vec![capability()],
      ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    let err = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: "pvc-1".into(),
      ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn keeps_topology_preferences() {
    let mut zone = HashMap::new();
    zone.insert("topology.blockdisk.csi.io/zone".to_owned(), "zone-b".to_owned());

    let request = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: "pvc-1".into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: 1 << 30,
        limit_bytes: 0,
      }),
      volume_capabilities: vec![capability()],
      accessibility_requirements: Some(proto::TopologyRequirement {
        requisite: vec![],
        preferred: vec![proto::Topology { segments: zone }],
      }),
      ..Default::default()
    })
    .unwrap();

    assert_eq!(request.name(), "pvc-1");
    assert_eq!(
      request.capacity_range().and_then(CapacityRange::required_bytes),
      Some(1 << 30)
    );
    let preferred = request
      .accessibility_requirements()
      .map(|r| r.preferred().to_vec())
      .unwrap_or_default();
    assert_eq!(
      preferred[0].get("topology.blockdisk.csi.io/zone").map(String::as_str),
      Some("zone-b")
    );
  }

  #[test]
  fn error_codes() {
    let status: tonic::Status = CreateVolumeError::UnsupportedCapacityRange("too big".into()).into();
    assert_eq!(status.code(), tonic::Code::OutOfRange);

    let status: tonic::Status = CreateVolumeError::AlreadyExists("pvc-1".into()).into();
    assert_eq!(status.code(), tonic::Code::AlreadyExists);
  }
}
