//! The capability every runtime client provides.

use async_trait::async_trait;
use commit_agent_core::error::Result;

/// Container runtime backing a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Containerd,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Docker => write!(f, "Docker"),
            RuntimeKind::Containerd => write!(f, "Containerd"),
        }
    }
}

/// What a successful push produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Image uploaded to a registry under this reference
    Registry { reference: String },
    /// Image added to IPFS under this content identifier
    Ipfs { cid: String },
}

/// Commit and push, implemented once per container runtime.
///
/// A client is built for a single call and dropped afterwards.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Runtime this client talks to.
    fn kind(&self) -> RuntimeKind;

    /// Snapshot the container's writable layer into a new image tagged `image`.
    async fn commit_image_from_self(&self, container_id: &str, image: &str) -> Result<()>;

    /// Push the local image `image` to its registry.
    async fn push_image_from_self(
        &self,
        image: &str,
        username: &str,
        password: &str,
    ) -> Result<PushOutcome>;
}
