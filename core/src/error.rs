use thiserror::Error;

/// Commit agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Neither runtime client could be constructed
    #[error("{runtime} client init error: {message}")]
    ClientInit { runtime: String, message: String },

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// No container matched the requested ID
    #[error("no such container {0}")]
    ContainerNotFound(String),

    /// More than one container matched the requested ID prefix
    #[error("ambiguous ID {0:?}")]
    AmbiguousContainerId(String),

    /// Runtime daemon call failed
    #[error("{runtime} error: {message}")]
    Runtime { runtime: String, message: String },

    /// Registry rejected the supplied credentials
    #[error("Registry auth error: {registry} - {message}")]
    RegistryAuth { registry: String, message: String },

    /// Credentials were requested for a registry other than the push target
    #[error("expected credentials for {expected:?}, got {actual:?}")]
    CredentialDomainMismatch { expected: String, actual: String },

    /// Registry push failed at the transport level
    #[error("Registry error: {registry} - {message}")]
    RegistryTransport { registry: String, message: String },

    /// Docker push stream ended with an error object
    #[error("{0}")]
    EmbeddedStream(String),

    /// Post-push signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// No image platform matched the requested platforms
    #[error("Platform error: {0}")]
    Platform(String),

    /// IPFS API error
    #[error("IPFS error: {0}")]
    Ipfs(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// gRPC communication error
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Runtime failure with the runtime's name attached.
    pub fn runtime(runtime: &str, message: impl std::fmt::Display) -> Self {
        AgentError::Runtime {
            runtime: runtime.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

/// Result type alias for commit agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
