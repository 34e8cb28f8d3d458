//! ImageService implementation.
//!
//! Maps the three RPCs onto the runtime [`Operator`].

use std::sync::Arc;

use commit_agent_core::VERSION;
use commit_agent_runtime::Operator;
use tonic::{Request, Response, Status};

use crate::error::agent_error_to_status;
use crate::image_api::image_service_server::ImageService;
use crate::image_api::*;

/// Commit agent implementation of the v1beta1 ImageService.
pub struct AgentImageService {
    operator: Arc<Operator>,
}

impl AgentImageService {
    pub fn new(operator: Arc<Operator>) -> Self {
        Self { operator }
    }
}

#[tonic::async_trait]
impl ImageService for AgentImageService {
    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        tracing::info!(version = VERSION, "Version requested");
        Ok(Response::new(VersionResponse {
            version: VERSION.to_string(),
        }))
    }

    async fn commit_image(
        &self,
        request: Request<CommitRequest>,
    ) -> Result<Response<CommitResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(container = %req.container_id, image = %req.image, "CommitImage");

        let result = self
            .operator
            .commit(&req.container_id, &req.image)
            .await
            .map_err(agent_error_to_status)?;

        Ok(Response::new(CommitResponse { result }))
    }

    async fn push_image(
        &self,
        request: Request<PushRequest>,
    ) -> Result<Response<PushResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(image = %req.image, username = %req.username, "PushImage");

        let result = self
            .operator
            .push(&req.image, &req.username, &req.password)
            .await
            .map_err(agent_error_to_status)?;

        Ok(Response::new(PushResponse { result }))
    }
}
