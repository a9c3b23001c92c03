use std::convert::TryFrom;

use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  pub struct NodeCapabilities: u32 {
    const STAGE_UNSTAGE_VOLUME         = 0b_0000_0001;
    const GET_VOLUME_STATS             = 0b_0000_0010;
    const EXPAND_VOLUME                = 0b_0000_0100;
    const VOLUME_CONDITION             = 0b_0000_1000;
  }
}

use proto::node_service_capability::rpc::Type;

const RPC_TYPES: [(NodeCapabilities, Type); 4] = [
  (NodeCapabilities::STAGE_UNSTAGE_VOLUME, Type::StageUnstageVolume),
  (NodeCapabilities::GET_VOLUME_STATS, Type::GetVolumeStats),
  (NodeCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (NodeCapabilities::VOLUME_CONDITION, Type::VolumeCondition),
];

impl TryFrom<NodeCapabilities> for proto::NodeGetCapabilitiesResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeCapabilities) -> Result<Self, Self::Error> {
    let capabilities = RPC_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::NodeServiceCapability {
        r#type: Some(proto::node_service_capability::Type::Rpc(
          proto::node_service_capability::Rpc { r#type: *ty as i32 },
        )),
      })
      .collect();

    Ok(proto::NodeGetCapabilitiesResponse { capabilities })
  }
}
