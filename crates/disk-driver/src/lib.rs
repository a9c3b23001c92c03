//! Block disk CSI driver: the controller and node services that move a
//! volume through its lifecycle against a remote block storage backend.
//!
//! The backend, the cluster node directory and the local mounter are
//! collaborators passed in by the binary. Serve the services with
//! [`csi_proto::Controller`] and [`csi_proto::Node`].

use csi_proto::{
  volume::{AccessMode, AccessType, VolumeCapability},
  VolumeExpansionSupport,
};
use std::collections::HashMap;

macro_rules! identity_service {
  (@methods) => {
    #[inline]
    fn name(&self) -> &str {
      self.identity.name()
    }

    #[inline]
    fn version(&self) -> &str {
      self.identity.version()
    }

    #[inline]
    fn volume_accessibility_constraints_support(&self) -> bool {
      true
    }

    #[inline]
    fn volume_expansion_support(&self) -> ::csi_proto::VolumeExpansionSupport {
      self.identity.expansion()
    }

    #[inline]
    fn manifest(&self) -> &::std::collections::HashMap<String, String> {
      self.identity.manifest()
    }
  };

  (impl<$param:ident: $bound:path> $driver:ty) => {
    impl<$param: $bound> ::csi_proto::IdentityService for $driver {
      identity_service!(@methods);
    }
  };

  ($driver:ty) => {
    impl ::csi_proto::IdentityService for $driver {
      identity_service!(@methods);
    }
  };
}

pub mod capacity;
pub mod cluster;
pub mod config;
mod controller;
mod error;
mod node;
pub mod params;
mod scheduler;
pub mod storage;
mod waiter;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, DriverConfig};
pub use controller::ControllerDriver;
pub use error::DriverError;
pub use node::{NodeDriver, NodeRegistrar, NodeTopology};
pub use scheduler::ZoneScheduler;
pub use waiter::{StatusWaiter, WaitError};

/// Volume context key holding the disk type.
pub const CONTEXT_TYPE_KEY: &str = "type";

/// Volume context key holding the zone the disk lives in.
pub const CONTEXT_ZONE_KEY: &str = "zone";

/// Volume context key that, when `"true"`, stages the device without
/// formatting it first.
pub const CONTEXT_SKIP_FORMAT_KEY: &str = "skipFormat";

/// Publish context key holding the device path reported by the backend.
pub const PUBLISH_MOUNT_POINT_KEY: &str = "mountPoint";

/// What both services report through the identity RPCs.
#[derive(Debug, Clone)]
pub(crate) struct PluginIdentity {
  name: String,
  version: String,
  expand_enabled: bool,
  manifest: HashMap<String, String>,
}

impl PluginIdentity {
  pub(crate) fn new(config: &DriverConfig) -> Self {
    let mut manifest = HashMap::new();
    if !config.region.is_empty() {
      manifest.insert("region".to_owned(), config.region.clone());
    }

    PluginIdentity {
      name: config.name.clone(),
      version: config.version.clone(),
      expand_enabled: config.expand_enabled,
      manifest,
    }
  }

  #[inline]
  pub(crate) fn name(&self) -> &str {
    &self.name
  }

  #[inline]
  pub(crate) fn version(&self) -> &str {
    &self.version
  }

  #[inline]
  pub(crate) fn expansion(&self) -> VolumeExpansionSupport {
    if self.expand_enabled {
      VolumeExpansionSupport::Online
    } else {
      VolumeExpansionSupport::None
    }
  }

  #[inline]
  pub(crate) fn manifest(&self) -> &HashMap<String, String> {
    &self.manifest
  }
}

/// Only filesystem volumes writable from a single node are supported.
pub(crate) fn check_capability(capability: &VolumeCapability) -> Result<(), tonic::Status> {
  if let AccessType::Block = capability.access_type() {
    return Err(tonic::Status::unimplemented(
      "Raw block volumes are not supported",
    ));
  }

  match capability.access_mode() {
    AccessMode::SingleNodeWriter => Ok(()),
    mode => Err(tonic::Status::invalid_argument(format!(
      "Access mode {:?} is not supported, only SingleNodeWriter is",
      mode
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use csi_proto::volume::MountVolume;
  use test_case::test_case;

  #[test_case(AccessMode::SingleNodeWriter, AccessType::Mount(MountVolume::default()), None)]
  #[test_case(AccessMode::MultiNodeMultiWriter, AccessType::Mount(MountVolume::default()), Some(tonic::Code::InvalidArgument))]
  #[test_case(AccessMode::SingleNodeWriter, AccessType::Block, Some(tonic::Code::Unimplemented))]
  fn capabilities(mode: AccessMode, ty: AccessType, expected: Option<tonic::Code>) {
    let result = check_capability(&VolumeCapability::new(mode, ty));
    assert_eq!(result.err().map(|s| s.code()), expected);
  }

  #[test]
  fn identity_follows_config() {
    let config = DriverConfig {
      region: "region-1".into(),
      expand_enabled: false,
      ..Default::default()
    };
    let identity = PluginIdentity::new(&config);

    assert_eq!(identity.name(), "blockdisk.csi.io");
    assert_eq!(identity.version(), env!("CARGO_PKG_VERSION"));
    assert_eq!(identity.expansion(), VolumeExpansionSupport::None);
    assert_eq!(
      identity.manifest().get("region").map(String::as_str),
      Some("region-1")
    );
  }
}
