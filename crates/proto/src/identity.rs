use crate::{proto, utils::Record, IdentityService, VolumeExpansionSupport};
use proto::plugin_capability::service::Type as ServiceType;
use tracing::debug;

pub(crate) fn plugin_info(s: &impl IdentityService) -> proto::GetPluginInfoResponse {
  proto::GetPluginInfoResponse {
    name: s.name().record_field("name").into(),
    vendor_version: s.version().record_field("vendor_version").into(),
    manifest: s.manifest().record_field("manifest").clone(),
  }
}

pub(crate) fn probe(s: &impl IdentityService) -> proto::ProbeResponse {
  proto::ProbeResponse {
    ready: Some(s.ready().record_field("ready")),
  }
}

/// Builds the plugin capabilities. `service` names the RPC service hosted
/// next to the identity service, if it is one the CO must be told about.
pub(crate) fn plugin_capabilities(
  s: &impl IdentityService,
  service: Option<ServiceType>,
) -> proto::GetPluginCapabilitiesResponse {
  #[inline]
  fn service_cap(ty: ServiceType) -> proto::PluginCapability {
    proto::PluginCapability {
      r#type: Some(proto::plugin_capability::Type::Service(
        proto::plugin_capability::Service { r#type: ty.into() },
      )),
    }
  }

  #[inline]
  fn expansion_cap(ty: proto::plugin_capability::volume_expansion::Type) -> proto::PluginCapability {
    proto::PluginCapability {
      r#type: Some(proto::plugin_capability::Type::VolumeExpansion(
        proto::plugin_capability::VolumeExpansion { r#type: ty.into() },
      )),
    }
  }

  let mut response = proto::GetPluginCapabilitiesResponse::default();
  if let Some(service) = service {
    response.capabilities.push(service_cap(service));
  }

  let volume_accessibility_constraints_support = s.volume_accessibility_constraints_support();
  if volume_accessibility_constraints_support {
    response
      .capabilities
      .push(service_cap(ServiceType::VolumeAccessibilityConstraints));
  }

  let volume_expansion_support = s.volume_expansion_support();
  match volume_expansion_support {
    VolumeExpansionSupport::None => (),
    VolumeExpansionSupport::Offline => response.capabilities.push(expansion_cap(
      proto::plugin_capability::volume_expansion::Type::Offline,
    )),
    VolumeExpansionSupport::Online => response.capabilities.push(expansion_cap(
      proto::plugin_capability::volume_expansion::Type::Online,
    )),
  }

  debug!(
    ?service,
    ?volume_accessibility_constraints_support,
    ?volume_expansion_support
  );
  response
}

/// Implements `proto::identity_server::Identity` for a service wrapper.
/// Controller and node plugins both answer identity calls on their socket.
macro_rules! identity_glue {
  ($wrapper:ident, $bound:ident, $service:expr) => {
    #[::async_trait::async_trait]
    impl<T: $bound> $crate::proto::identity_server::Identity for $wrapper<T> {
      #[::tracing::instrument(
        name = "identity.get_plugin_info",
        skip(self, _request),
        fields(name, vendor_version, manifest)
      )]
      async fn get_plugin_info(
        &self,
        _request: ::tonic::Request<$crate::proto::GetPluginInfoRequest>,
      ) -> Result<::tonic::Response<$crate::proto::GetPluginInfoResponse>, ::tonic::Status> {
        Ok(::tonic::Response::new($crate::identity::plugin_info(&*self.0)))
      }

      #[::tracing::instrument(
        name = "identity.get_plugin_capabilities",
        skip(self, _request),
        fields(response)
      )]
      async fn get_plugin_capabilities(
        &self,
        _request: ::tonic::Request<$crate::proto::GetPluginCapabilitiesRequest>,
      ) -> Result<::tonic::Response<$crate::proto::GetPluginCapabilitiesResponse>, ::tonic::Status>
      {
        use $crate::utils::Record;

        let response =
          $crate::identity::plugin_capabilities(&*self.0, $service).record_response();
        Ok(::tonic::Response::new(response))
      }

      #[::tracing::instrument(name = "identity.probe", skip(self, _request), fields(ready))]
      async fn probe(
        &self,
        _request: ::tonic::Request<$crate::proto::ProbeRequest>,
      ) -> Result<::tonic::Response<$crate::proto::ProbeResponse>, ::tonic::Status> {
        Ok(::tonic::Response::new($crate::identity::probe(&*self.0)))
      }
    }
  };
}
