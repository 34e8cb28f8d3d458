//! Runtime detection and client construction.
//!
//! Exactly one runtime socket is probed per call: if the Docker socket exists
//! the Docker client is used, otherwise containerd. Nothing is cached.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use commit_agent_core::config::AgentConfig;
use commit_agent_core::error::Result;

use crate::client::{ContainerClient, RuntimeKind};
use crate::containerd::{ContainerdClient, PushOptions};
use crate::docker::DockerClient;
use crate::sign::{signer_for, Signer};

/// Which runtime a host with this Docker socket path runs.
pub fn detect_runtime(docker_socket: &Path) -> RuntimeKind {
    if docker_socket.exists() {
        RuntimeKind::Docker
    } else {
        RuntimeKind::Containerd
    }
}

/// Builds a fresh client for every operation.
#[async_trait]
pub trait ClientSelector: Send + Sync {
    async fn select(&self) -> Result<Box<dyn ContainerClient>>;
}

/// Selects between the host's Docker and containerd daemons.
pub struct HostClientSelector {
    config: Arc<AgentConfig>,
    signer: Arc<dyn Signer>,
}

impl HostClientSelector {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        let signer = signer_for(&config.sign);
        Self { config, signer }
    }
}

#[async_trait]
impl ClientSelector for HostClientSelector {
    async fn select(&self) -> Result<Box<dyn ContainerClient>> {
        select_client(&self.config, self.signer.clone()).await
    }
}

/// Connect to whichever runtime the host runs.
pub async fn select_client(
    config: &AgentConfig,
    signer: Arc<dyn Signer>,
) -> Result<Box<dyn ContainerClient>> {
    match detect_runtime(&config.docker_socket) {
        RuntimeKind::Docker => {
            let client =
                DockerClient::connect(&config.docker_socket, config.operation_timeout()).await?;
            Ok(Box::new(client))
        }
        RuntimeKind::Containerd => {
            let client = ContainerdClient::connect(
                &config.containerd_socket,
                &config.namespace,
                PushOptions::from(config),
                signer,
            )
            .await?;
            Ok(Box::new(client))
        }
    }
}
