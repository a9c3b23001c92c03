use std::convert::TryFrom;

use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  pub struct ControllerCapabilities: u32 {
    const CREATE_DELETE_VOLUME         = 0b_0000_0000_0001;
    const PUBLISH_UNPUBLISH_VOLUME     = 0b_0000_0000_0010;
    const LIST_VOLUMES                 = 0b_0000_0000_0100;

    /// Indicates the SP supports ControllerPublishVolume.readonly
    /// field.
    const PUBLISH_READONLY             = 0b_0000_0000_1000;

    /// See VolumeExpansion for details.
    const EXPAND_VOLUME                = 0b_0000_0001_0000;

    /// Indicates the SP supports the
    /// ListVolumesResponse.entry.published_nodes field
    const LIST_VOLUMES_PUBLISHED_NODES = 0b_0000_0010_0000;

    /// Indicates that the Controller service can report volume
    /// conditions. If Controller and Node Plugins report misaligned
    /// volume conditions, CO SHALL assume the worst case is the truth.
    const VOLUME_CONDITION             = 0b_0000_0100_0000;

    /// Indicates the SP supports the ControllerGetVolume RPC.
    const GET_VOLUME                   = 0b_0000_1000_0000;
  }
}

use proto::controller_service_capability::rpc::Type;

const RPC_TYPES: [(ControllerCapabilities, Type); 8] = [
  (ControllerCapabilities::CREATE_DELETE_VOLUME, Type::CreateDeleteVolume),
  (ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME, Type::PublishUnpublishVolume),
  (ControllerCapabilities::LIST_VOLUMES, Type::ListVolumes),
  (ControllerCapabilities::PUBLISH_READONLY, Type::PublishReadonly),
  (ControllerCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (ControllerCapabilities::LIST_VOLUMES_PUBLISHED_NODES, Type::ListVolumesPublishedNodes),
  (ControllerCapabilities::VOLUME_CONDITION, Type::VolumeCondition),
  (ControllerCapabilities::GET_VOLUME, Type::GetVolume),
];

impl TryFrom<ControllerCapabilities> for proto::ControllerGetCapabilitiesResponse {
  type Error = tonic::Status;

  fn try_from(value: ControllerCapabilities) -> Result<Self, Self::Error> {
    let capabilities = RPC_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::ControllerServiceCapability {
        r#type: Some(proto::controller_service_capability::Type::Rpc(
          proto::controller_service_capability::Rpc { r#type: *ty as i32 },
        )),
      })
      .collect();

    Ok(proto::ControllerGetCapabilitiesResponse { capabilities })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::TryInto;

  #[test]
  fn only_set_flags_are_reported() {
    let response: proto::ControllerGetCapabilitiesResponse =
      (ControllerCapabilities::CREATE_DELETE_VOLUME | ControllerCapabilities::GET_VOLUME)
        .try_into()
        .unwrap();

    let types: Vec<i32> = response
      .capabilities
      .iter()
      .filter_map(|c| match &c.r#type {
        Some(proto::controller_service_capability::Type::Rpc(rpc)) => Some(rpc.r#type),
        None => None,
      })
      .collect();
    assert_eq!(
      types,
      vec![Type::CreateDeleteVolume as i32, Type::GetVolume as i32]
    );
  }
}
