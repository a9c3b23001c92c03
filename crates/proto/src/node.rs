mod capabilities;
mod expand_volume;
mod get_info;
mod get_volume_stats;
mod publish_volume;
mod stage_volume;
mod unpublish_volume;
mod unstage_volume;

use crate::{
  proto,
  secrets::*,
  utils::{record_request, Record},
  IdentityService,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use expand_volume::*;
pub use get_info::*;
pub use get_volume_stats::*;
pub use publish_volume::*;
pub use stage_volume::*;
pub use unpublish_volume::*;
pub use unstage_volume::*;

#[async_trait]
pub trait NodeService: IdentityService {
  /// Get the set of services provided by this node plugin.
  #[inline]
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::empty()
  }

  /// A Node Plugin MUST implement this RPC call if it has `STAGE_UNSTAGE_VOLUME`
  /// node capability.
  ///
  /// This RPC is called by the CO prior to the volume being consumed by any workloads
  /// on the node by `NodePublishVolume`. The Plugin SHALL assume that this RPC will be
  /// executed on the node where the volume will be used. This RPC SHOULD be called by
  /// the CO when a workload that wants to use the specified volume is placed (scheduled)
  /// on the specified node for the first time or for the first time since a
  /// `NodeUnstageVolume` call for the volume was called and returned success on that node.
  ///
  /// This operation MUST be idempotent. If the volume corresponding to the `volume_id`
  /// is already staged to the `staging_target_path`, and is identical to the specified
  /// `volume_capability` the Plugin MUST reply `0 OK`.
  #[allow(unused_variables)]
  async fn node_stage_volume(
    &self,
    request: NodeStageVolumeRequest,
  ) -> Result<(), NodeStageVolumeError> {
    unsupported!("NodeStageVolume")
  }

  /// A Node Plugin MUST implement this RPC call if it has `STAGE_UNSTAGE_VOLUME`
  /// node capability. This RPC is a reverse operation of `NodeStageVolume`.
  ///
  /// This operation MUST be idempotent. If the volume corresponding to the `volume_id`
  /// is not staged to the `staging_target_path`, the Plugin MUST reply `0 OK`.
  #[allow(unused_variables)]
  async fn node_unstage_volume(
    &self,
    request: NodeUnstageVolumeRequest,
  ) -> Result<(), NodeUnstageVolumeError> {
    unsupported!("NodeUnstageVolume")
  }

  /// This RPC is called by the CO when a workload that wants to use the specified
  /// volume is placed (scheduled) on a node. The Plugin SHALL assume that this RPC
  /// will be executed on the node where the volume will be used.
  ///
  /// This operation MUST be idempotent. If the volume corresponding to the `volume_id`
  /// has already been published at the specified `target_path`, and is compatible with
  /// the specified `volume_capability` and `readonly` flag, the Plugin MUST reply `0 OK`.
  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError>;

  /// A Node Plugin MUST implement this RPC call. This RPC is a reverse operation of
  /// `NodePublishVolume`. This RPC MUST undo the work by the corresponding
  /// `NodePublishVolume`.
  ///
  /// This operation MUST be idempotent. If this RPC failed, or the CO does not know if
  /// it failed or not, it can choose to call `NodeUnpublishVolume` again.
  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError>;

  /// A Node plugin MUST implement this RPC call if it has `GET_VOLUME_STATS` node
  /// capability or `VOLUME_CONDITION` node capability.
  #[allow(unused_variables)]
  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse, NodeGetVolumeStatsError> {
    unsupported!("NodeGetVolumeStats")
  }

  /// A Node Plugin MUST implement this RPC call if it has `EXPAND_VOLUME` node
  /// capability. This RPC call allows CO to expand volume on a node.
  ///
  /// This operation MUST be idempotent. If a volume corresponding to the specified
  /// volume ID is already larger than or equal to the target capacity of the expansion
  /// request, the plugin SHOULD reply 0 OK.
  #[allow(unused_variables)]
  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse, NodeExpandVolumeError> {
    unsupported!("NodeExpandVolume")
  }

  /// A Node Plugin MUST implement this RPC call if the plugin has `PUBLISH_UNPUBLISH_VOLUME`
  /// controller capability. The Plugin SHALL assume that this RPC will be executed on the
  /// node where the volume will be used. The CO SHOULD call this RPC for the node at which
  /// it wants to place the workload. The result of this call will be used by CO in
  /// `ControllerPublishVolume`.
  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, NodeGetInfoError>;
}

/// Serves a [`NodeService`] over gRPC.
pub struct Node<T>(Arc<T>);

impl<T: NodeService> Node<T> {
  pub fn new(service: T) -> Self {
    Node(Arc::new(service))
  }

  pub fn from_arc(service: Arc<T>) -> Self {
    Node(service)
  }

  /// The identity and node servers to mount on the plugin socket.
  pub fn into_servers(
    self,
  ) -> (
    proto::identity_server::IdentityServer<Self>,
    proto::node_server::NodeServer<Self>,
  ) {
    (
      proto::identity_server::IdentityServer::new(self.clone()),
      proto::node_server::NodeServer::new(self),
    )
  }
}

impl<T> Clone for Node<T> {
  fn clone(&self) -> Self {
    Node(self.0.clone())
  }
}

identity_glue!(Node, NodeService, None);

#[async_trait]
impl<T: NodeService> proto::node_server::Node for Node<T> {
  #[instrument(name = "node.node_stage_volume", skip(self, request), fields(request))]
  async fn node_stage_volume(
    &self,
    request: tonic::Request<proto::NodeStageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeStageVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.node_stage_volume(request).await?;
    Ok(tonic::Response::new(proto::NodeStageVolumeResponse {}))
  }

  #[instrument(name = "node.node_unstage_volume", skip(self, request), fields(request))]
  async fn node_unstage_volume(
    &self,
    request: tonic::Request<proto::NodeUnstageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnstageVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.node_unstage_volume(request).await?;
    Ok(tonic::Response::new(proto::NodeUnstageVolumeResponse {}))
  }

  #[instrument(name = "node.node_publish_volume", skip(self, request), fields(request))]
  async fn node_publish_volume(
    &self,
    request: tonic::Request<proto::NodePublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodePublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.node_publish_volume(request).await?;
    Ok(tonic::Response::new(proto::NodePublishVolumeResponse {}))
  }

  #[instrument(name = "node.node_unpublish_volume", skip(self, request), fields(request))]
  async fn node_unpublish_volume(
    &self,
    request: tonic::Request<proto::NodeUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnpublishVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    self.0.node_unpublish_volume(request).await?;
    Ok(tonic::Response::new(proto::NodeUnpublishVolumeResponse {}))
  }

  #[instrument(
    name = "node.node_get_volume_stats",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_get_volume_stats(
    &self,
    request: tonic::Request<proto::NodeGetVolumeStatsRequest>,
  ) -> Result<tonic::Response<proto::NodeGetVolumeStatsResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .node_get_volume_stats(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_expand_volume(
    &self,
    request: tonic::Request<proto::NodeExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeExpandVolumeResponse>, tonic::Status> {
    let request = record_request(request.into_inner().try_into()?);
    let response = self
      .0
      .node_expand_volume(request)
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn node_get_capabilities(
    &self,
    _request: tonic::Request<proto::NodeGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::NodeGetCapabilitiesResponse>, tonic::Status> {
    let response = self.0.capabilities().record_response().try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "node.node_get_info", skip(self, _request), fields(response))]
  async fn node_get_info(
    &self,
    _request: tonic::Request<proto::NodeGetInfoRequest>,
  ) -> Result<tonic::Response<proto::NodeGetInfoResponse>, tonic::Status> {
    let response = self
      .0
      .node_get_info()
      .await?
      .record_response()
      .try_into()?;
    Ok(tonic::Response::new(response))
  }
}
