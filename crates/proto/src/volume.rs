use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  fmt,
  num::NonZeroU64,
};

use crate::proto;

/// Topology segments, e.g. `{"topology.example.io/zone": "zone-a"}`.
pub type Topology = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeContentSource {
  Snapshot(String),
  Volume(String),
}

impl TryFrom<proto::VolumeContentSource> for Option<VolumeContentSource> {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeContentSource) -> Result<Self, Self::Error> {
    #[inline]
    fn fail_if_empty(v: String, error: &'static str) -> Result<String, tonic::Status> {
      if v.is_empty() {
        Err(tonic::Status::invalid_argument(error))
      } else {
        Ok(v)
      }
    }

    Ok(match value.r#type {
      None => None,
      Some(proto::volume_content_source::Type::Volume(v)) => Some(VolumeContentSource::Volume(
        fail_if_empty(v.volume_id, "VolumeContentSource volume_id cannot be empty")?,
      )),
      Some(proto::volume_content_source::Type::Snapshot(v)) => {
        Some(VolumeContentSource::Snapshot(fail_if_empty(
          v.snapshot_id,
          "VolumeContentSource snapshot_id cannot be empty",
        )?))
      }
    })
  }
}

impl From<VolumeContentSource> for proto::VolumeContentSource {
  fn from(value: VolumeContentSource) -> Self {
    proto::VolumeContentSource {
      r#type: Some(match value {
        VolumeContentSource::Snapshot(snapshot_id) => proto::volume_content_source::Type::Snapshot(
          proto::volume_content_source::SnapshotSource { snapshot_id },
        ),
        VolumeContentSource::Volume(volume_id) => {
          proto::volume_content_source::Type::Volume(proto::volume_content_source::VolumeSource {
            volume_id,
          })
        }
      }),
    }
  }
}

/// Topology constraints the CO places on a volume to be provisioned.
#[derive(Debug, Clone, Default)]
pub struct TopologyRequirement {
  requisite: Vec<Topology>,
  preferred: Vec<Topology>,
}

impl TopologyRequirement {
  /// The provisioned volume MUST be accessible from at least one of
  /// these topologies.
  #[inline]
  pub fn requisite(&self) -> &[Topology] {
    &self.requisite
  }

  /// Topologies the CO would prefer, in order of preference.
  #[inline]
  pub fn preferred(&self) -> &[Topology] {
    &self.preferred
  }
}

impl From<proto::TopologyRequirement> for TopologyRequirement {
  fn from(value: proto::TopologyRequirement) -> Self {
    let segments = |v: Vec<proto::Topology>| v.into_iter().map(|t| t.segments).collect();

    TopologyRequirement {
      requisite: segments(value.requisite),
      preferred: segments(value.preferred),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Volume {
  capacity_bytes: Option<NonZeroU64>,
  volume_id: String,
  volume_context: HashMap<String, String>,
  content_source: Option<VolumeContentSource>,
  accessible_topology: Vec<Topology>,
}

impl Volume {
  pub fn new(volume_id: impl Into<String>, capacity_bytes: u64) -> Self {
    Volume {
      capacity_bytes: NonZeroU64::new(capacity_bytes),
      volume_id: volume_id.into(),
      volume_context: HashMap::new(),
      content_source: None,
      accessible_topology: Vec::new(),
    }
  }

  pub fn with_context(mut self, volume_context: HashMap<String, String>) -> Self {
    self.volume_context = volume_context;
    self
  }

  pub fn with_accessible_topology(mut self, topology: Topology) -> Self {
    self.accessible_topology.push(topology);
    self
  }

  /// The capacity of the volume in bytes. `None` means unknown.
  #[inline]
  pub fn capacity_bytes(&self) -> Option<u64> {
    self.capacity_bytes.map(NonZeroU64::get)
  }

  /// The identifier for this volume, generated by the plugin.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Opaque static properties of the volume. The CO passes them back in
  /// every subsequent call for this volume.
  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  #[inline]
  pub fn content_source(&self) -> Option<&VolumeContentSource> {
    self.content_source.as_ref()
  }

  /// Where the provisioned volume is accessible from.
  #[inline]
  pub fn accessible_topology(&self) -> &[Topology] {
    &self.accessible_topology
  }
}

impl From<Volume> for proto::Volume {
  fn from(value: Volume) -> Self {
    let capacity_bytes = match value.capacity_bytes {
      None => 0,
      Some(v) => v.get() as i64,
    };
    let accessible_topology = value
      .accessible_topology
      .into_iter()
      .map(|segments| proto::Topology { segments })
      .collect();

    proto::Volume {
      capacity_bytes,
      volume_id: value.volume_id,
      volume_context: value.volume_context,
      content_source: value.content_source.map(Into::into),
      accessible_topology,
    }
  }
}

impl TryFrom<Volume> for proto::CreateVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: Volume) -> Result<Self, Self::Error> {
    Ok(proto::CreateVolumeResponse {
      volume: Some(value.into()),
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCapability {
  access_mode: AccessMode,
  access_type: AccessType,
}

impl VolumeCapability {
  pub fn new(access_mode: AccessMode, access_type: AccessType) -> Self {
    VolumeCapability {
      access_mode,
      access_type,
    }
  }

  #[inline]
  pub fn access_mode(&self) -> AccessMode {
    self.access_mode
  }

  #[inline]
  pub fn access_type(&self) -> &AccessType {
    &self.access_type
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AccessMode {
  Unknown,
  /// Can only be published once as read/write on a single node, at
  /// any given time.
  SingleNodeWriter,
  /// Can only be published once as readonly on a single node, at
  /// any given time.
  SingleNodeReaderOnly,
  /// Can be published as readonly at multiple nodes simultaneously.
  MultiNodeReaderOnly,
  /// Can be published at multiple nodes simultaneously. Only one of
  /// the node can be used as read/write. The rest will be readonly.
  MultiNodeSingleWriter,
  /// Can be published as read/write at multiple nodes
  /// simultaneously.
  MultiNodeMultiWriter,
}

use proto::volume_capability::access_mode::Mode;

impl From<proto::volume_capability::AccessMode> for AccessMode {
  fn from(value: proto::volume_capability::AccessMode) -> Self {
    match Mode::from_i32(value.mode) {
      Some(Mode::SingleNodeWriter) => AccessMode::SingleNodeWriter,
      Some(Mode::SingleNodeReaderOnly) => AccessMode::SingleNodeReaderOnly,
      Some(Mode::MultiNodeReaderOnly) => AccessMode::MultiNodeReaderOnly,
      Some(Mode::MultiNodeSingleWriter) => AccessMode::MultiNodeSingleWriter,
      Some(Mode::MultiNodeMultiWriter) => AccessMode::MultiNodeMultiWriter,
      _ => AccessMode::Unknown,
    }
  }
}

impl From<AccessMode> for proto::volume_capability::AccessMode {
  fn from(value: AccessMode) -> Self {
    let mode = match value {
      AccessMode::Unknown => Mode::Unknown,
      AccessMode::SingleNodeWriter => Mode::SingleNodeWriter,
      AccessMode::SingleNodeReaderOnly => Mode::SingleNodeReaderOnly,
      AccessMode::MultiNodeReaderOnly => Mode::MultiNodeReaderOnly,
      AccessMode::MultiNodeSingleWriter => Mode::MultiNodeSingleWriter,
      AccessMode::MultiNodeMultiWriter => Mode::MultiNodeMultiWriter,
    } as i32;

    proto::volume_capability::AccessMode { mode }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessType {
  /// Indicate that the volume will be accessed via the block device API.
  Block,

  /// Indicate that the volume will be accessed via the filesystem API.
  Mount(MountVolume),
}

impl AccessType {
  #[inline]
  pub fn mount(&self) -> Option<&MountVolume> {
    match self {
      AccessType::Block => None,
      AccessType::Mount(v) => Some(v),
    }
  }
}

impl From<proto::volume_capability::AccessType> for AccessType {
  fn from(value: proto::volume_capability::AccessType) -> Self {
    match value {
      proto::volume_capability::AccessType::Block(_) => AccessType::Block,
      proto::volume_capability::AccessType::Mount(v) => AccessType::Mount(v.into()),
    }
  }
}

impl From<AccessType> for proto::volume_capability::AccessType {
  fn from(value: AccessType) -> Self {
    match value {
      AccessType::Block => {
        proto::volume_capability::AccessType::Block(proto::volume_capability::BlockVolume {})
      }
      AccessType::Mount(v) => proto::volume_capability::AccessType::Mount(v.into()),
    }
  }
}

#[derive(Clone, PartialEq, Default)]
pub struct MountVolume {
  fs_type: Option<String>,
  mount_flags: Vec<String>,
}

impl MountVolume {
  pub fn new(fs_type: Option<String>, mount_flags: Vec<String>) -> Self {
    MountVolume {
      fs_type: fs_type.filter(|v| !v.is_empty()),
      mount_flags,
    }
  }

  /// The filesystem type.
  #[inline]
  pub fn fs_type(&self) -> Option<&str> {
    self.fs_type.as_deref()
  }

  /// The mount options that can be used for the volume. This field is
  /// OPTIONAL. `mount_flags` MAY contain sensitive information.
  /// Therefore, the CO and the Plugin MUST NOT leak this information
  /// to untrusted entities. The total size of this repeated field
  /// SHALL NOT exceed 4 KiB.
  pub fn mount_flags(&self) -> impl Iterator<Item = &str> + ExactSizeIterator {
    self.mount_flags.iter().map(|v| &**v)
  }
}

impl From<proto::volume_capability::MountVolume> for MountVolume {
  fn from(value: proto::volume_capability::MountVolume) -> Self {
    MountVolume::new(Some(value.fs_type), value.mount_flags)
  }
}

impl From<MountVolume> for proto::volume_capability::MountVolume {
  fn from(value: MountVolume) -> Self {
    proto::volume_capability::MountVolume {
      fs_type: value.fs_type.unwrap_or_default(),
      mount_flags: value.mount_flags,
    }
  }
}

impl fmt::Debug for MountVolume {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountVolume")
      .field("fs_type", &self.fs_type)
      .field(
        "mount_flags",
        &format!("REDACTED ({} items)", self.mount_flags.len()),
      )
      .finish()
  }
}

impl TryFrom<proto::VolumeCapability> for VolumeCapability {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeCapability) -> Result<Self, Self::Error> {
    let access_mode = value
      .access_mode
      .ok_or_else(|| tonic::Status::invalid_argument("Missing access_mode for VolumeCapability"))?
      .into();

    let access_type = value
      .access_type
      .ok_or_else(|| tonic::Status::invalid_argument("Missing access_type for VolumeCapability"))?
      .into();

    Ok(VolumeCapability {
      access_mode,
      access_type,
    })
  }
}

impl From<VolumeCapability> for proto::VolumeCapability {
  fn from(value: VolumeCapability) -> Self {
    proto::VolumeCapability {
      access_mode: Some(value.access_mode.into()),
      access_type: Some(value.access_type.into()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCondition {
  /// Normal volumes are available for use and operating optimally.
  /// An abnormal volume does not meet these criteria.
  abnormal: bool,
  /// The message describing the condition of the volume.
  /// This field is REQUIRED.
  message: String,
}

impl VolumeCondition {
  pub fn normal(message: impl Into<String>) -> Self {
    VolumeCondition {
      abnormal: false,
      message: message.into(),
    }
  }

  pub fn abnormal(message: impl Into<String>) -> Self {
    VolumeCondition {
      abnormal: true,
      message: message.into(),
    }
  }

  #[inline]
  pub fn is_abnormal(&self) -> bool {
    self.abnormal
  }

  #[inline]
  pub fn message(&self) -> &str {
    &self.message
  }
}

impl From<VolumeCondition> for proto::VolumeCondition {
  fn from(value: VolumeCondition) -> Self {
    proto::VolumeCondition {
      abnormal: value.abnormal,
      message: value.message,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct VolumeStatus {
  /// A list of all `node_id` of nodes that the volume in this entry
  /// is controller published on.
  /// This field is OPTIONAL. If it is not specified and the SP has
  /// the LIST_VOLUMES_PUBLISHED_NODES controller capability, the CO
  /// MAY assume the volume is not controller published to any nodes.
  /// If the field is not specified and the SP does not have the
  /// LIST_VOLUMES_PUBLISHED_NODES controller capability, the CO MUST
  /// not interpret this field.
  /// published_node_ids MAY include nodes not published to or
  /// reported by the SP. The CO MUST be resilient to that.
  published_node_ids: Vec<String>,

  /// Information about the current condition of the volume.
  /// This field is OPTIONAL.
  /// This field MUST be specified if the
  /// VOLUME_CONDITION controller capability is supported.
  volume_condition: Option<VolumeCondition>,
}

impl VolumeStatus {
  pub fn new(published_node_ids: Vec<String>, volume_condition: Option<VolumeCondition>) -> Self {
    VolumeStatus {
      published_node_ids,
      volume_condition,
    }
  }

  #[inline]
  pub fn published_node_ids(&self) -> &[String] {
    &self.published_node_ids
  }

  #[inline]
  pub fn volume_condition(&self) -> Option<&VolumeCondition> {
    self.volume_condition.as_ref()
  }
}

impl From<VolumeStatus> for proto::list_volumes_response::VolumeStatus {
  fn from(value: VolumeStatus) -> Self {
    proto::list_volumes_response::VolumeStatus {
      published_node_ids: value.published_node_ids,
      volume_condition: value.volume_condition.map(Into::into),
    }
  }
}

impl From<VolumeStatus> for proto::controller_get_volume_response::VolumeStatus {
  fn from(value: VolumeStatus) -> Self {
    proto::controller_get_volume_response::VolumeStatus {
      published_node_ids: value.published_node_ids,
      volume_condition: value.volume_condition.map(Into::into),
    }
  }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUsageUnit {
  Bytes,
  Inodes,
}

impl From<VolumeUsageUnit> for proto::volume_usage::Unit {
  fn from(value: VolumeUsageUnit) -> Self {
    match value {
      VolumeUsageUnit::Bytes => proto::volume_usage::Unit::Bytes,
      VolumeUsageUnit::Inodes => proto::volume_usage::Unit::Inodes,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeUsage {
  /// The available capacity in specified Unit.
  available: u64,
  /// The total capacity in specified Unit.
  total: u64,
  /// The used capacity in specified Unit.
  used: u64,
  /// Units by which values are measured.
  unit: VolumeUsageUnit,
}

impl VolumeUsage {
  pub fn new(unit: VolumeUsageUnit, total: u64, available: u64, used: u64) -> Self {
    VolumeUsage {
      available,
      total,
      used,
      unit,
    }
  }

  #[inline]
  pub fn unit(&self) -> VolumeUsageUnit {
    self.unit
  }

  #[inline]
  pub fn total(&self) -> u64 {
    self.total
  }

  #[inline]
  pub fn available(&self) -> u64 {
    self.available
  }

  #[inline]
  pub fn used(&self) -> u64 {
    self.used
  }
}

impl From<VolumeUsage> for proto::VolumeUsage {
  fn from(value: VolumeUsage) -> Self {
    proto::VolumeUsage {
      available: value.available as i64,
      total: value.total as i64,
      used: value.used as i64,
      unit: proto::volume_usage::Unit::from(value.unit) as i32,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityRange {
  AtLeast(NonZeroU64),
  AtMost(NonZeroU64),
  /// Effectively AtLeast(.0) & AtMost(.1). The bounds are not checked
  /// against each other here, that is left to the plugin.
  Between(NonZeroU64, NonZeroU64),
}

impl CapacityRange {
  /// The lower bound in bytes, if one was given.
  #[inline]
  pub fn required_bytes(&self) -> Option<u64> {
    match self {
      CapacityRange::AtLeast(r) | CapacityRange::Between(r, _) => Some(r.get()),
      CapacityRange::AtMost(_) => None,
    }
  }

  /// The upper bound in bytes, if one was given.
  #[inline]
  pub fn limit_bytes(&self) -> Option<u64> {
    match self {
      CapacityRange::AtMost(l) | CapacityRange::Between(_, l) => Some(l.get()),
      CapacityRange::AtLeast(_) => None,
    }
  }

  /// Converts an optional wire range. A range with both bounds unset is
  /// the same as no range at all.
  pub(crate) fn from_optional(
    value: Option<proto::CapacityRange>,
  ) -> Result<Option<Self>, tonic::Status> {
    match value {
      None => Ok(None),
      Some(v) if v.required_bytes == 0 && v.limit_bytes == 0 => Ok(None),
      Some(v) => v.try_into().map(Some),
    }
  }
}

impl TryFrom<proto::CapacityRange> for CapacityRange {
  type Error = tonic::Status;

  fn try_from(value: proto::CapacityRange) -> Result<Self, Self::Error> {
    if value.required_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.required_bytes cannot be negative",
      ));
    }

    if value.limit_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.limit_bytes cannot be negative",
      ));
    }

    let required = NonZeroU64::new(value.required_bytes as u64);
    let limit = NonZeroU64::new(value.limit_bytes as u64);
    match (required, limit) {
      (Some(r), None) => Ok(CapacityRange::AtLeast(r)),
      (None, Some(l)) => Ok(CapacityRange::AtMost(l)),
      (Some(r), Some(l)) => Ok(CapacityRange::Between(r, l)),
      (None, None) => Err(tonic::Status::invalid_argument(
        "CapacityRange must set required_bytes or limit_bytes",
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  fn range(required_bytes: i64, limit_bytes: i64) -> proto::CapacityRange {
    proto::CapacityRange {
      required_bytes,
      limit_bytes,
    }
  }

  #[test_case(10, 0 => Some((Some(10), None)) ; "lower bound only")]
  #[test_case(0, 20 => Some((None, Some(20))) ; "upper bound only")]
  #[test_case(10, 20 => Some((Some(10), Some(20))) ; "both bounds")]
  #[test_case(30, 20 => Some((Some(30), Some(20))) ; "unordered bounds are kept")]
  #[test_case(0, 0 => None ; "no bounds")]
  #[test_case(-1, 0 => None ; "negative required")]
  #[test_case(0, -1 => None ; "negative limit")]
  fn capacity_range_from_proto(required: i64, limit: i64) -> Option<(Option<u64>, Option<u64>)> {
    CapacityRange::try_from(range(required, limit))
      .ok()
      .map(|r| (r.required_bytes(), r.limit_bytes()))
  }

  #[test]
  fn empty_optional_range_is_none() {
    assert_eq!(CapacityRange::from_optional(None).unwrap(), None);
    assert_eq!(CapacityRange::from_optional(Some(range(0, 0))).unwrap(), None);
    assert!(CapacityRange::from_optional(Some(range(-5, 0))).is_err());
  }

  #[test]
  fn capability_requires_mode_and_type() {
    let missing_type = proto::VolumeCapability {
      access_mode: Some(AccessMode::SingleNodeWriter.into()),
      access_type: None,
    };
    assert!(VolumeCapability::try_from(missing_type).is_err());

    let capability = VolumeCapability::try_from(proto::VolumeCapability {
      access_mode: Some(AccessMode::SingleNodeWriter.into()),
      access_type: Some(
        AccessType::Mount(MountVolume::new(Some("xfs".into()), vec!["noatime".into()])).into(),
      ),
    })
    .unwrap();
    assert_eq!(capability.access_mode(), AccessMode::SingleNodeWriter);
    assert_eq!(
      capability.access_type().mount().and_then(MountVolume::fs_type),
      Some("xfs")
    );
  }

  #[test]
  fn mount_flags_are_redacted() {
    let mount = MountVolume::new(None, vec!["password=hunter2".into()]);
    let debug = format!("{:?}", mount);

    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("1 items"));
  }
}
