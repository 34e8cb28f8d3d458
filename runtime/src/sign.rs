//! Post-push image signing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use commit_agent_core::config::{SignConfig, SignProvider};
use commit_agent_core::error::{AgentError, Result};
use tokio::process::Command;

/// Signs a pushed image, addressed as `<name>@<digest>`.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, reference: &str) -> Result<()>;
}

/// Provider `none`.
#[derive(Debug, Default, Clone)]
pub struct NoopSigner;

#[async_trait]
impl Signer for NoopSigner {
    async fn sign(&self, reference: &str) -> Result<()> {
        tracing::debug!(reference, "Signing disabled");
        Ok(())
    }
}

/// Provider `cosign`: shells out to the `cosign` binary.
#[derive(Debug, Clone)]
pub struct CosignSigner {
    binary: PathBuf,
    key: Option<PathBuf>,
}

impl CosignSigner {
    /// Keyless signing when `key` is `None`.
    pub fn new(key: Option<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("cosign"),
            key,
        }
    }

    /// Use a specific cosign binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn args(&self, reference: &str) -> Vec<String> {
        let mut args = vec!["sign".to_string(), "--yes".to_string()];
        if let Some(ref key) = self.key {
            args.push("--key".to_string());
            args.push(key.display().to_string());
        }
        args.push(reference.to_string());
        args
    }
}

#[async_trait]
impl Signer for CosignSigner {
    async fn sign(&self, reference: &str) -> Result<()> {
        tracing::info!(reference, keyless = self.key.is_none(), "Signing image with cosign");

        let output = Command::new(&self.binary)
            .args(self.args(reference))
            .output()
            .await
            .map_err(|e| {
                AgentError::Signing(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Signing(format!(
                "cosign sign {} failed ({}): {}",
                reference,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Signer for the configured provider.
pub fn signer_for(config: &SignConfig) -> Arc<dyn Signer> {
    match config.provider {
        SignProvider::None => Arc::new(NoopSigner),
        SignProvider::Cosign => Arc::new(CosignSigner::new(config.cosign_key.clone())),
    }
}
