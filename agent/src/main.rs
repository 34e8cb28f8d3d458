//! Commit Agent binary.
//!
//! Serves the image service on a node-local Unix socket so that workloads on
//! the node can commit their own container and push the result.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commit_agent::server::AgentServer;
use commit_agent::socket::SocketAddress;
use commit_agent_core::config::{AgentConfig, LogFormat, SignProvider};
use commit_agent_core::VERSION;
use commit_agent_runtime::{HostClientSelector, Operator};

/// Commit Agent
#[derive(Parser, Debug)]
#[command(name = "commit-agent", version, about = "Commit and push container images on this node")]
struct Args {
    /// Socket address the agent listens on; `@name` for an abstract socket.
    #[arg(long)]
    socket_address: Option<String>,

    /// YAML configuration file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Docker daemon socket; its presence selects Docker.
    #[arg(long)]
    docker_socket: Option<PathBuf>,

    /// containerd socket.
    #[arg(long)]
    containerd_socket: Option<PathBuf>,

    /// containerd namespace.
    #[arg(long)]
    namespace: Option<String>,

    /// Allow falling back to plain HTTP registries.
    #[arg(long)]
    insecure_registry: bool,

    /// Platform to push (os[/arch[/variant]]); repeatable.
    #[arg(long = "platform")]
    platforms: Vec<String>,

    /// Push every platform of an image.
    #[arg(long)]
    all_platforms: bool,

    /// Push non-distributable (foreign) layers too.
    #[arg(long)]
    allow_nondistributable_artifacts: bool,

    /// IPFS API address (multiaddr or URL).
    #[arg(long)]
    ipfs_address: Option<String>,

    /// Deadline for each commit or push, in seconds.
    #[arg(long)]
    operation_timeout: Option<u64>,

    /// Signing provider: none or cosign.
    #[arg(long)]
    sign: Option<SignProvider>,

    /// cosign private key; keyless when unset.
    #[arg(long)]
    cosign_key: Option<PathBuf>,

    /// Log format: text or json.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Args {
    /// File (or default) configuration with flags applied on top.
    fn into_config(self) -> commit_agent_core::Result<AgentConfig> {
        let mut config = match self.config {
            Some(ref path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };

        if let Some(socket_address) = self.socket_address {
            config.socket_address = socket_address;
        }
        if let Some(docker_socket) = self.docker_socket {
            config.docker_socket = docker_socket;
        }
        if let Some(containerd_socket) = self.containerd_socket {
            config.containerd_socket = containerd_socket;
        }
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if self.insecure_registry {
            config.insecure_registry = true;
        }
        if !self.platforms.is_empty() {
            config.platforms = self.platforms;
        }
        if self.all_platforms {
            config.all_platforms = true;
        }
        if self.allow_nondistributable_artifacts {
            config.allow_nondistributable_artifacts = true;
        }
        if self.ipfs_address.is_some() {
            config.ipfs_address = self.ipfs_address;
        }
        if let Some(secs) = self.operation_timeout {
            config.operation_timeout_secs = secs;
        }
        if let Some(provider) = self.sign {
            config.sign.provider = provider;
        }
        if self.cosign_key.is_some() {
            config.sign.cosign_key = self.cosign_key;
        }
        if let Some(log_format) = self.log_format {
            config.log_format = log_format;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;
    init_tracing(config.log_format);

    let address = SocketAddress::parse(&config.socket_address);
    tracing::info!(socket = %address, "Checking socket path");
    if address.ensure_parent_dir()? {
        if let Some(parent) = address.path().and_then(|p| p.parent()) {
            tracing::info!(dir = %parent.display(), "Created socket directory");
        }
    }

    tracing::info!(
        version = VERSION,
        socket = %address,
        docker_socket = %config.docker_socket.display(),
        containerd_socket = %config.containerd_socket.display(),
        namespace = %config.namespace,
        timeout_secs = config.operation_timeout_secs,
        "Starting commit agent"
    );

    let config = Arc::new(config);
    let selector = Arc::new(HostClientSelector::new(config.clone()));
    let operator = Arc::new(Operator::new(selector, config.operation_timeout()));

    let mut server = AgentServer::new(address, operator);
    let mut errors = server.start()?;

    let outcome = tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal?;
            tracing::info!(signal, "Captured signal, shutting down");
            Ok(())
        }
        err = errors.recv() => match err {
            Some(e) => Err(e),
            None => Err(commit_agent_core::AgentError::Other(
                "image server exited unexpectedly".to_string(),
            )),
        },
    };

    server.stop().await;
    if let Err(ref e) = outcome {
        tracing::error!(error = %e, "Commit agent failed");
    }
    outcome.map_err(Into::into)
}
