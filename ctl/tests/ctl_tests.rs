//! commit-ctl against a live agent backed by a fake runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use commit_agent::server::AgentServer;
use commit_agent::socket::SocketAddress;
use commit_agent_core::error::{AgentError, Result};
use commit_agent_runtime::{ClientSelector, ContainerClient, Operator, PushOutcome, RuntimeKind};
use commit_ctl::commands::{dispatch, Cli};

struct FakeRuntime;

#[async_trait]
impl ContainerClient for FakeRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn commit_image_from_self(&self, _container_id: &str, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn push_image_from_self(
        &self,
        image: &str,
        username: &str,
        _password: &str,
    ) -> Result<PushOutcome> {
        if username != "alice" {
            return Err(AgentError::RegistryAuth {
                registry: "registry.local".to_string(),
                message: "401 Unauthorized".to_string(),
            });
        }
        Ok(PushOutcome::Registry {
            reference: image.to_string(),
        })
    }
}

struct FakeSelector;

#[async_trait]
impl ClientSelector for FakeSelector {
    async fn select(&self) -> Result<Box<dyn ContainerClient>> {
        Ok(Box::new(FakeRuntime))
    }
}

fn start_agent(dir: &std::path::Path) -> (AgentServer, String) {
    let socket = dir.join("agent.sock");
    let operator = Operator::new(Arc::new(FakeSelector), Duration::from_secs(5));
    let mut server = AgentServer::new(SocketAddress::Path(socket.clone()), Arc::new(operator));
    let _errors = server.start().unwrap();
    (server, socket.display().to_string())
}

#[tokio::test]
async fn test_version_command() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, socket) = start_agent(dir.path());

    let cli = Cli::parse_from(["commit-ctl", "--server-socket", socket.as_str(), "version"]);
    dispatch(cli).await.unwrap();

    server.stop().await;
}

#[tokio::test]
async fn test_push_command() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, socket) = start_agent(dir.path());

    let cli = Cli::parse_from([
        "commit-ctl",
        "--server-socket",
        socket.as_str(),
        "push",
        "registry.local/team/nb:v1",
        "--username",
        "alice",
    ]);
    dispatch(cli).await.unwrap();

    let cli = Cli::parse_from([
        "commit-ctl",
        "--server-socket",
        socket.as_str(),
        "push",
        "registry.local/team/nb:v1",
    ]);
    let err = dispatch(cli).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Registry auth error: registry.local - 401 Unauthorized"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_agent_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("missing.sock").display().to_string();

    let cli = Cli::parse_from(["commit-ctl", "--server-socket", socket.as_str(), "version"]);
    assert!(dispatch(cli).await.is_err());
}
