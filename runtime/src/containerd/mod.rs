//! containerd-backed [`ContainerClient`].
//!
//! Talks to containerd's gRPC services directly: the container walker and
//! snapshot diff for commit, the content and image stores plus an OCI
//! registry client for push.

mod api;
mod commit;
mod content;
mod convert;
mod ipfs;
mod push;
#[cfg(test)]
mod testing;
mod walker;

pub use api::ContainerdApi;
pub use content::{Descriptor, ImageContentStore, ImageRecord};
pub use convert::{TempImage, REDUCED_PLATFORM_SUFFIX};
pub use ipfs::{HttpIpfsApi, IpfsApi};
pub use push::{collect_content, PushOptions, Pusher};
pub use walker::{find_container, ContainerSummary};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use commit_agent_core::error::Result;

use crate::client::{ContainerClient, PushOutcome, RuntimeKind};
use crate::oci::{ImageReference, OciRegistryTransport};
use crate::sign::Signer;

/// containerd API client for one namespace, scoped to one call.
pub struct ContainerdClient {
    api: ContainerdApi,
    options: PushOptions,
    signer: Arc<dyn Signer>,
}

impl ContainerdClient {
    pub async fn connect(
        socket: &Path,
        namespace: &str,
        options: PushOptions,
        signer: Arc<dyn Signer>,
    ) -> Result<Self> {
        let api = ContainerdApi::connect(socket, namespace).await?;
        Ok(Self {
            api,
            options,
            signer,
        })
    }
}

#[async_trait]
impl ContainerClient for ContainerdClient {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Containerd
    }

    async fn commit_image_from_self(&self, container_id: &str, image: &str) -> Result<()> {
        let reference = ImageReference::parse(image)?;
        let containers = self.api.list_containers().await?;
        let container = find_container(&containers, container_id)?;

        tracing::debug!(
            container = %container.id,
            namespace = self.api.namespace(),
            snapshotter = %container.snapshotter,
            "Found container"
        );
        commit::commit_container(&self.api, container, &reference).await?;
        Ok(())
    }

    async fn push_image_from_self(
        &self,
        image: &str,
        username: &str,
        password: &str,
    ) -> Result<PushOutcome> {
        let pusher = Pusher::new(
            Arc::new(self.api.clone()),
            Arc::new(OciRegistryTransport::new()),
            self.signer.clone(),
            self.options.clone(),
        );
        pusher.push(image, username, password).await
    }
}
