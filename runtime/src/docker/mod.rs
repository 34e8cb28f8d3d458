//! Docker-backed [`ContainerClient`].
//!
//! Both capabilities are single daemon calls through `bollard`: container
//! commit, and image push with the daemon's streamed progress checked for a
//! late failure.

mod stream;

pub use stream::check_push_response;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::Config;
use bollard::image::{CommitContainerOptions, PushImageOptions};
use bollard::Docker;
use commit_agent_core::error::{AgentError, Result};
use futures::StreamExt;

use crate::client::{ContainerClient, PushOutcome, RuntimeKind};
use crate::oci::reference::{has_explicit_tag, DEFAULT_TAG};
use crate::oci::ImageReference;

const RUNTIME: &str = "Docker";

/// Docker Engine API client scoped to one call.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connect to the daemon socket and negotiate the API version.
    pub async fn connect(socket: &Path, timeout: Duration) -> Result<Self> {
        let socket = socket.to_string_lossy();
        let docker =
            Docker::connect_with_unix(&socket, timeout.as_secs(), bollard::API_DEFAULT_VERSION)
                .map_err(|e| init_error(&e))?;
        let docker = docker
            .negotiate_version()
            .await
            .map_err(|e| init_error(&e))?;

        tracing::debug!(socket = %socket, "Connected to Docker daemon");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerClient for DockerClient {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn commit_image_from_self(&self, container_id: &str, image: &str) -> Result<()> {
        let reference = ImageReference::parse(image)?;
        let tag = match (&reference.tag, &reference.digest) {
            (Some(tag), _) => tag.clone(),
            (None, Some(_)) => {
                return Err(AgentError::InvalidReference(format!(
                    "{:?}: cannot commit to a digest reference",
                    image
                )))
            }
            (None, None) => DEFAULT_TAG.to_string(),
        };

        let options = CommitContainerOptions {
            container: container_id.to_string(),
            repo: reference.familiar_name(),
            tag,
            comment: String::new(),
            author: String::new(),
            pause: false,
            changes: None,
        };

        let commit = self
            .docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| commit_error(container_id, e))?;

        tracing::info!(
            container = %container_id,
            image = %reference,
            id = ?commit.id,
            "Container committed"
        );
        Ok(())
    }

    async fn push_image_from_self(
        &self,
        image: &str,
        username: &str,
        password: &str,
    ) -> Result<PushOutcome> {
        let reference = ImageReference::parse(image)?;
        if uses_default_tag(image, &reference) {
            tracing::info!("Using default tag: {}", DEFAULT_TAG);
        }

        let credentials = DockerCredentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some(reference.domain().to_string()),
            ..Default::default()
        };

        let name = reference.familiar_name();
        let tag = reference.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string());
        let mut progress = Box::pin(self.docker.push_image(
            &name,
            Some(PushImageOptions { tag: tag.clone() }),
            Some(credentials),
        ));

        let mut lines = Vec::new();
        while let Some(item) = progress.next().await {
            match item {
                Ok(info) => lines.push(serde_json::to_string(&info)?),
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    lines.push(stream::error_line(&error));
                }
                Err(e) => {
                    tracing::info!(image = %reference, error = %e, "push image failed");
                    return Err(AgentError::runtime(RUNTIME, e));
                }
            }
        }

        check_push_response(&lines)?;

        tracing::info!(image = %reference, "Image pushed");
        Ok(PushOutcome::Registry {
            reference: format!("{}:{}", name, tag),
        })
    }
}

/// The push falls back to `latest` only when the caller gave neither a tag
/// nor a digest.
fn uses_default_tag(raw: &str, reference: &ImageReference) -> bool {
    !has_explicit_tag(raw) && reference.digest.is_none()
}

fn init_error(err: &bollard::errors::Error) -> AgentError {
    AgentError::ClientInit {
        runtime: RUNTIME.to_string(),
        message: err.to_string(),
    }
}

fn commit_error(container_id: &str, err: bollard::errors::Error) -> AgentError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => AgentError::ContainerNotFound(container_id.to_string()),
        other => AgentError::runtime(RUNTIME, other),
    }
}
