use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AgentError, Result};

/// Default listen address for the agent's Unix socket.
pub const DEFAULT_SOCKET_ADDRESS: &str = "/host/run/commit-agent/commit-agent.sock";

/// Host Docker socket, bind-mounted into the agent's pod.
pub const DEFAULT_DOCKER_SOCKET: &str = "/host/run/docker.sock";

/// Host containerd socket, bind-mounted into the agent's pod.
pub const DEFAULT_CONTAINERD_SOCKET: &str = "/host/run/containerd/containerd.sock";

/// containerd namespace used by the kubelet CRI plugin.
pub const DEFAULT_NAMESPACE: &str = "k8s.io";

/// Default per-operation deadline: 30 minutes.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30 * 60;

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Unix socket the RPC server listens on (`@name` for the abstract namespace)
    pub socket_address: String,

    /// Docker socket; its presence selects the Docker runtime
    pub docker_socket: PathBuf,

    /// containerd socket, used when the Docker socket is absent
    pub containerd_socket: PathBuf,

    /// containerd namespace holding the pod containers
    pub namespace: String,

    /// Allow plain HTTP and skip certificate verification for registries
    pub insecure_registry: bool,

    /// Platforms to push (`os/arch[/variant]`); empty means the host platform
    pub platforms: Vec<String>,

    /// Push every platform of the local image index
    pub all_platforms: bool,

    /// Push foreign / non-distributable layers too
    pub allow_nondistributable_artifacts: bool,

    /// IPFS API address (multiaddr or URL) for `ipfs://` pushes
    pub ipfs_address: Option<String>,

    /// Deadline for a single commit or push, in seconds
    pub operation_timeout_secs: u64,

    /// Post-push signing
    pub sign: SignConfig,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_address: DEFAULT_SOCKET_ADDRESS.to_string(),
            docker_socket: PathBuf::from(DEFAULT_DOCKER_SOCKET),
            containerd_socket: PathBuf::from(DEFAULT_CONTAINERD_SOCKET),
            namespace: DEFAULT_NAMESPACE.to_string(),
            insecure_registry: false,
            platforms: Vec::new(),
            all_platforms: false,
            allow_nondistributable_artifacts: false,
            ipfs_address: None,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            sign: SignConfig::default(),
            log_format: LogFormat::Text,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AgentConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.socket_address.trim().is_empty() {
            return Err(AgentError::Config("socket_address must not be empty".to_string()));
        }
        if self.namespace.trim().is_empty() {
            return Err(AgentError::Config("namespace must not be empty".to_string()));
        }
        if self.operation_timeout_secs == 0 {
            return Err(AgentError::Config(
                "operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        for platform in &self.platforms {
            let parts: Vec<&str> = platform.split('/').collect();
            if parts.len() > 3 || parts.iter().any(|p| p.trim().is_empty()) {
                return Err(AgentError::Config(format!(
                    "invalid platform {:?}: expected os[/arch[/variant]]",
                    platform
                )));
            }
        }
        Ok(())
    }

    /// Deadline applied to each commit or push.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Whether the socket lives in the Linux abstract namespace.
    pub fn is_abstract_socket(&self) -> bool {
        self.socket_address.starts_with('@')
    }
}

/// Signing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignConfig {
    /// Signing provider
    pub provider: SignProvider,

    /// cosign private key; keyless signing when unset
    pub cosign_key: Option<PathBuf>,
}

/// Signing provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignProvider {
    /// No signing
    #[default]
    None,
    /// Sign with the `cosign` binary
    Cosign,
}

impl std::str::FromStr for SignProvider {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(SignProvider::None),
            "cosign" => Ok(SignProvider::Cosign),
            other => Err(AgentError::Config(format!(
                "unknown sign provider {:?}",
                other
            ))),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AgentError::Config(format!("unknown log format {:?}", other))),
        }
    }
}
