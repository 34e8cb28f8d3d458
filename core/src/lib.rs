//! Commit Agent Core - shared error and configuration types.
//!
//! Everything here is runtime-agnostic: the Docker and containerd clients,
//! the gRPC server and the control CLI all build on these types.

pub mod config;
pub mod error;

pub use config::{AgentConfig, LogFormat, SignConfig, SignProvider};
pub use error::{AgentError, Result};

/// Commit agent version, reported by the `Version` RPC.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
