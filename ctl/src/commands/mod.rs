//! commit-ctl command definitions and dispatch.

mod commit;
mod push;
mod version;

use clap::{Parser, Subcommand};

use commit_agent::client::connect;
use commit_agent::image_api::image_service_client::ImageServiceClient;
use commit_agent::socket::SocketAddress;
use commit_agent_core::config::DEFAULT_SOCKET_ADDRESS;
use tonic::transport::Channel;

/// Commit and push the calling container through the node's commit agent.
#[derive(Parser)]
#[command(name = "commit-ctl", version, about)]
pub struct Cli {
    /// Socket address of the commit agent
    #[arg(long, global = true, default_value = DEFAULT_SOCKET_ADDRESS)]
    pub server_socket: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Print the agent version
    Version(version::VersionArgs),
    /// Create a new image from this container
    Commit(commit::CommitArgs),
    /// Push an image to a registry
    Push(push::PushArgs),
}

/// Dispatch a parsed CLI command.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let address = SocketAddress::parse(&cli.server_socket);
    match cli.command {
        Command::Version(args) => version::execute(args, address).await,
        Command::Commit(args) => commit::execute(args, address).await,
        Command::Push(args) => push::execute(args, address).await,
    }
}

async fn agent_client(
    address: SocketAddress,
) -> Result<ImageServiceClient<Channel>, Box<dyn std::error::Error>> {
    let socket = address.to_string();
    connect(address).await.map_err(|e| {
        tracing::error!(socket = %socket, error = %e, "did not connect");
        format!("failed to connect to commit agent at {}: {}", socket, e).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket() {
        let cli = Cli::parse_from(["commit-ctl", "version"]);
        assert_eq!(cli.server_socket, "/host/run/commit-agent/commit-agent.sock");
    }

    #[test]
    fn test_push_flags() {
        let cli = Cli::parse_from([
            "commit-ctl",
            "--server-socket",
            "@agent",
            "push",
            "registry.local/team/nb:v1",
            "--username",
            "alice",
            "--password",
            "secret",
        ]);
        assert_eq!(cli.server_socket, "@agent");
        match cli.command {
            Command::Push(args) => {
                assert_eq!(args.image, "registry.local/team/nb:v1");
                assert_eq!(args.username, "alice");
                assert_eq!(args.password, "secret");
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_commit_requires_image() {
        assert!(Cli::try_parse_from(["commit-ctl", "commit"]).is_err());
    }

    #[tokio::test]
    async fn test_agent_client_names_socket_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");

        let err = agent_client(SocketAddress::Path(path.clone()))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("failed to connect to commit agent at "));
        assert!(message.contains(&path.display().to_string()));
    }
}
