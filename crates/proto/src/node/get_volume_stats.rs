use super::{VolumeCondition, VolumeUsage};
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
pub struct NodeGetVolumeStatsRequest {
  volume_id: String,
  volume_path: PathBuf,
  staging_target_path: Option<PathBuf>,
}

impl NodeGetVolumeStatsRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// It can be any valid path where volume was previously
  /// staged or published.
  #[inline]
  pub fn volume_path(&self) -> &Path {
    &self.volume_path
  }

  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }
}

impl TryFrom<proto::NodeGetVolumeStatsRequest> for NodeGetVolumeStatsRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeGetVolumeStatsRequest) -> Result<Self, Self::Error> {
    let volume_id = required(
      value.volume_id,
      "NodeGetVolumeStatsRequest.volume_id is empty",
    )?;
    let volume_path = absolute_path(
      value.volume_path,
      "NodeGetVolumeStatsRequest.volume_path is empty",
      "NodeGetVolumeStatsRequest.volume_path is not absolute",
    )?;

    let staging_target_path = match value.staging_target_path {
      v if v.is_empty() => None,
      v => Some(absolute_path(
        v,
        "NodeGetVolumeStatsRequest.staging_target_path is empty",
        "NodeGetVolumeStatsRequest.staging_target_path is not absolute",
      )?),
    };

    Ok(NodeGetVolumeStatsRequest {
      volume_id,
      volume_path,
      staging_target_path,
    })
  }
}

#[derive(Debug)]
pub struct NodeGetVolumeStatsResponse {
  usage: Vec<VolumeUsage>,
  volume_condition: Option<VolumeCondition>,
}

impl NodeGetVolumeStatsResponse {
  pub fn new(usage: Vec<VolumeUsage>, volume_condition: Option<VolumeCondition>) -> Self {
    NodeGetVolumeStatsResponse {
      usage,
      volume_condition,
    }
  }

  #[inline]
  pub fn usage(&self) -> &[VolumeUsage] {
    &self.usage
  }

  #[inline]
  pub fn volume_condition(&self) -> Option<&VolumeCondition> {
    self.volume_condition.as_ref()
  }
}

impl TryFrom<NodeGetVolumeStatsResponse> for proto::NodeGetVolumeStatsResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeGetVolumeStatsResponse) -> Result<Self, Self::Error> {
    Ok(proto::NodeGetVolumeStatsResponse {
      usage: value.usage.into_iter().map(Into::into).collect(),
      volume_condition: value.volume_condition.map(Into::into),
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeGetVolumeStatsError {
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeGetVolumeStatsError> for tonic::Status {
  fn from(value: NodeGetVolumeStatsError) -> Self {
    match value {
      NodeGetVolumeStatsError::VolumeNotFound(v) => tonic::Status::not_found(v),
      NodeGetVolumeStatsError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::volume::VolumeUsageUnit;
  use std::convert::TryInto;

  #[test]
  fn usage_is_reported_per_unit() {
    let response: proto::NodeGetVolumeStatsResponse = NodeGetVolumeStatsResponse::new(
      vec![
        VolumeUsage::new(VolumeUsageUnit::Bytes, 100, 60, 40),
        VolumeUsage::new(VolumeUsageUnit::Inodes, 10, 9, 1),
      ],
      Some(VolumeCondition::normal("ok")),
    )
    .try_into()
    .unwrap();

    assert_eq!(response.usage.len(), 2);
    assert_eq!(response.usage[0].unit, proto::volume_usage::Unit::Bytes as i32);
    assert_eq!(response.usage[0].used, 40);
    assert_eq!(response.usage[1].unit, proto::volume_usage::Unit::Inodes as i32);
    assert_eq!(response.volume_condition.map(|c| c.abnormal), Some(false));
  }
}
