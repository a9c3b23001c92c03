mod capabilities;
mod create_volume;
mod delete_volume;
mod expand_volume;
mod get_volume;
mod list_volumes;
mod publish_volume;
mod unpublish_volume;
mod validate_volume_capabilities;

use crate::{
  proto,
  secrets::*,
  utils::{record_request, Record},
  IdentityService,
};
use async_trait::async_trait;
use proto::plugin_capability::service::Type as ServiceType;
use std::{convert::TryInto, sync::Arc};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use create_volume::*;
pub use delete_volume::*;
pub use expand_volume::*;
pub use get_volume::*;
pub use list_volumes::*;
pub use publish_volume::*;
pub use unpublish_volume::*;
pub use validate_volume_capabilities::*;

#[async_trait]
pub trait ControllerService: IdentityService {
  /// Get the set of services provided by this controller.
  #[inline]
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::empty()
  }

  /// A Controller Plugin MUST implement this RPC call if it has `CREATE_DELETE_VOLUME`
  /// controller capability.
  ///
  /// This RPC will be called by the CO to provision a new volume on behalf of a user
  /// (to be consumed as either a block device or a mounted filesystem).
  ///
  /// This operation MUST be idempotent.
  ///
  /// If a volume corresponding to the specified volume `name` already exists, is
  /// accessible from `accessibility_requirements`, and is compatible with the specified
  /// `capacity_range`, `volume_capabilities` and `parameters` in the `CreateVolumeRequest`,
  /// the Plugin MUST reply `0 OK` with the corresponding `CreateVolumeResponse`.
  #[allow(unused_variables)]
  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CreateVolumeError> {
    unsupported!("CreateVolume")
  }

  /// A Controller Plugin MUST implement this RPC call if it has CREATE_DELETE_VOLUME capability.
  /// This RPC will be called by the CO to deprovision a volume.
  ///
  /// This operation MUST be idempotent. If a volume corresponding to the specified volume_id
  /// does not exist or the artifacts associated with the volume do not exist anymore, the
  /// Plugin MUST reply 0 OK.
  #[allow(unused_variables)]
  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    unsupported!("DeleteVolume")
  }

  /// A Controller Plugin MUST implement this RPC call if it has PUBLISH_UNPUBLISH_VOLUME
  /// controller capability. This RPC will be called by the CO when it wants to place a workload
  /// that uses the volume onto a node. The Plugin SHOULD perform the work that is necessary for
  /// making the volume available on the given node. The Plugin MUST NOT assume that this RPC
  /// will be executed on the node where the volume will be used.
  ///
  /// This operation MUST be idempotent. If the volume corresponding to the volume_id has
  /// already been published at the node corresponding to the node_id, and is compatible with
  /// the specified volume_capability and readonly flag, the Plugin MUST reply 0 OK.
  #[allow(unused_variables)]
  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse, ControllerPublishVolumeError> {
    unsupported!("ControllerPublishVolume")
  }

  /// Controller Plugin MUST implement this RPC call if it has PUBLISH_UNPUBLISH_VOLUME
  /// controller capability. This RPC is a reverse operation of ControllerPublishVolume.
  /// It MUST be called after all NodeUnstageVolume and NodeUnpublishVolume on the volume
  /// are called and succeed.
  ///
  /// This operation MUST be idempotent. If the volume corresponding to the volume_id is
  /// not attached to the node corresponding to the node_id, the Plugin MUST reply 0 OK.
  #[allow(unused_variables)]
  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<(), ControllerUnpublishVolumeError> {
    unsupported!("ControllerUnpublishVolume")
  }

  /// A Controller Plugin MUST implement this RPC call. This RPC will be called by the
  /// CO to check if a pre-provisioned volume has all the capabilities that the CO wants.
  /// This RPC call SHALL return confirmed only if all the volume capabilities specified
  /// in the request are supported. This operation MUST be idempotent.
  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError>;

  /// A Controller Plugin MUST implement this RPC call if it has LIST_VOLUMES capability.
  /// The Plugin SHALL return the information about all the volumes that it knows about.
  #[allow(unused_variables)]
  async fn list_volumes(
    &self,
    request: ListVolumesRequest,
  ) -> Result<ListVolumesResponse, ListVolumesError> {
    unsupported!("ListVolumes")
  }

  /// A Controller plugin MUST implement this RPC call if plugin has `EXPAND_VOLUME`
  /// controller capability. This RPC allows the CO to expand the size of a volume.
  ///
  /// This operation MUST be idempotent. If a volume corresponding to the specified
  /// volume ID is already larger than or equal to the target capacity of the expansion
  /// request, the plugin SHOULD reply 0 OK.
  ///
  /// If plugin has `EXPAND_VOLUME` node capability, then `NodeExpandVolume` MUST be
  /// called after successful `ControllerExpandVolume` and `node_expansion_required` in
  /// `ControllerExpandVolumeResponse` is `true`.
  #[allow(unused_variables)]
  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    unsupported!("ControllerExpandVolume")
  }

  /// This optional RPC MAY be called by the CO to fetch current information about
  /// a volume.
  ///
  /// A Controller Plugin MUST provide a non-empty `volume_condition` field in
  /// `ControllerGetVolumeResponse` if it has `VOLUME_CONDITION` capability.
  #[allow(unused_variables)]
  async fn controller_get_volume(
    &self,
    request: ControllerGetVolumeRequest,
  ) -> Result<ControllerGetVolumeResponse, ControllerGetVolumeError> {
    unsupported!("ControllerGetVolume")
  }
}

/// Serves a [`ControllerService`] over gRPC.
pub struct Controller<T>(Arc<T>);

impl<T: ControllerService> Controller<T> {
  pub fn new(service: T) -> Self {
    Controller(Arc::new(service))
  }

  pub fn from_arc(service: Arc<T>) -> Self {
    Controller(service)
  }

  /// The identity and controller servers to mount on the plugin socket.
  pub fn into_servers(
    self,
  ) -> (
    proto::identity_server::IdentityServer<Self>,
    proto::controller_server::ControllerServer<Self>,
  ) {
    (
      proto::identity_server::IdentityServer::new(self.clone()),
      proto::controller_server::ControllerServer::new(self),
    )
  }
}

impl<T> Clone for Controller<T> {
  fn clone(&self) -> Self {
    Controller(self.0.clone())
  }
}

identity_glue!(
  Controller,
  ControllerService,
  Some(ServiceType::ControllerService)
);

#[async_trait]
impl<T: ControllerService> proto::controller_server::Controller for Controller<T> {
  #[instrument(
    name = "controller.create_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_volume(
    &self,
    request: tonic::Request<proto::CreateVolumeRequest>,
  ) -> Result<tonic::Response<proto::CreateVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .create_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.delete_volume",
    skip(self, request),
    fields(request)
  )]
  async fn delete_volume(
    &self,
    request: tonic::Request<proto::DeleteVolumeRequest>,
  ) -> Result<tonic::Response<proto::DeleteVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.delete_volume(request).await?;
    Ok(tonic::Response::new(proto::DeleteVolumeResponse {}))
  }

  #[instrument(
    name = "controller.controller_publish_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_publish_volume(
    &self,
    request: tonic::Request<proto::ControllerPublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerPublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .controller_publish_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.controller_unpublish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn controller_unpublish_volume(
    &self,
    request: tonic::Request<proto::ControllerUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerUnpublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.controller_unpublish_volume(request).await?;
    Ok(tonic::Response::new(
      proto::ControllerUnpublishVolumeResponse {},
    ))
  }

  #[instrument(
    name = "controller.validate_volume_capabilities",
    skip(self, request),
    fields(request, response)
  )]
  async fn validate_volume_capabilities(
    &self,
    request: tonic::Request<proto::ValidateVolumeCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ValidateVolumeCapabilitiesResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .validate_volume_capabilities(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.list_volumes",
    skip(self, request),
    fields(request, response)
  )]
  async fn list_volumes(
    &self,
    request: tonic::Request<proto::ListVolumesRequest>,
  ) -> Result<tonic::Response<proto::ListVolumesResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .list_volumes(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.get_capacity", skip(self, _request))]
  async fn get_capacity(
    &self,
    _request: tonic::Request<proto::GetCapacityRequest>,
  ) -> Result<tonic::Response<proto::GetCapacityResponse>, tonic::Status> {
    unsupported!("GetCapacity")
  }

  #[instrument(
    name = "controller.controller_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn controller_get_capabilities(
    &self,
    _request: tonic::Request<proto::ControllerGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetCapabilitiesResponse>, tonic::Status> {
    let response = self.0.capabilities().record_response().try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.create_snapshot", skip(self, _request))]
  async fn create_snapshot(
    &self,
    _request: tonic::Request<proto::CreateSnapshotRequest>,
  ) -> Result<tonic::Response<proto::CreateSnapshotResponse>, tonic::Status> {
    unsupported!("CreateSnapshot")
  }

  #[instrument(name = "controller.delete_snapshot", skip(self, _request))]
  async fn delete_snapshot(
    &self,
    _request: tonic::Request<proto::DeleteSnapshotRequest>,
  ) -> Result<tonic::Response<proto::DeleteSnapshotResponse>, tonic::Status> {
    unsupported!("DeleteSnapshot")
  }

  #[instrument(name = "controller.list_snapshots", skip(self, _request))]
  async fn list_snapshots(
    &self,
    _request: tonic::Request<proto::ListSnapshotsRequest>,
  ) -> Result<tonic::Response<proto::ListSnapshotsResponse>, tonic::Status> {
    unsupported!("ListSnapshots")
  }

  #[instrument(
    name = "controller.controller_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_expand_volume(
    &self,
    request: tonic::Request<proto::ControllerExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerExpandVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .controller_expand_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.controller_get_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_get_volume(
    &self,
    request: tonic::Request<proto::ControllerGetVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .controller_get_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }
}
