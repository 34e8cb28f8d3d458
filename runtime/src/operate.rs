//! Commit and push as served over RPC.
//!
//! Every call picks a fresh runtime client, runs under the configured
//! deadline and logs the stage that failed.

use std::sync::Arc;
use std::time::Duration;

use commit_agent_core::error::{AgentError, Result};

use crate::client::{ContainerClient, PushOutcome};
use crate::select::ClientSelector;

/// Runs commit and push against whichever runtime the selector picks.
pub struct Operator {
    selector: Arc<dyn ClientSelector>,
    timeout: Duration,
}

impl Operator {
    pub fn new(selector: Arc<dyn ClientSelector>, timeout: Duration) -> Self {
        Self { selector, timeout }
    }

    /// Commit `container_id` as `image`.
    pub async fn commit(&self, container_id: &str, image: &str) -> Result<String> {
        let operation = async {
            let client = self.client().await?;
            client
                .commit_image_from_self(container_id, image)
                .await
                .map_err(|e| {
                    tracing::error!(container = container_id, image, error = %e, "Container save error");
                    e
                })
        };
        self.with_deadline("commit", operation).await?;

        let message = format!("Container save success, image: {}", image);
        tracing::info!("{}", message);
        Ok(message)
    }

    /// Push the local image `image`. IPFS pushes answer with the CID.
    pub async fn push(&self, image: &str, username: &str, password: &str) -> Result<String> {
        let operation = async {
            let client = self.client().await?;
            client
                .push_image_from_self(image, username, password)
                .await
                .map_err(|e| {
                    tracing::error!(image, error = %e, "image push error");
                    e
                })
        };

        let message = match self.with_deadline("push", operation).await? {
            PushOutcome::Ipfs { cid } => cid,
            PushOutcome::Registry { .. } => format!("Image pushed successfully: {}", image),
        };
        tracing::info!("{}", message);
        Ok(message)
    }

    async fn client(&self) -> Result<Box<dyn ContainerClient>> {
        let client = self.selector.select().await.map_err(|e| {
            match &e {
                AgentError::ClientInit { runtime, .. } => {
                    tracing::error!(error = %e, "{} client init error", runtime)
                }
                _ => tracing::error!(error = %e, "client init error"),
            }
            e
        })?;
        tracing::debug!(runtime = %client.kind(), "Runtime client ready");
        Ok(client)
    }

    async fn with_deadline<T>(
        &self,
        operation: &str,
        future: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(operation, timeout_secs = self.timeout.as_secs(), "Operation timed out");
                Err(AgentError::Timeout(format!(
                    "{} did not finish within {:?}",
                    operation, self.timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RuntimeKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        Hang,
        Ipfs,
    }

    struct FakeClient {
        behavior: Behavior,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ContainerClient for FakeClient {
        fn kind(&self) -> RuntimeKind {
            RuntimeKind::Containerd
        }

        async fn commit_image_from_self(&self, container_id: &str, image: &str) -> Result<()> {
            self.calls.lock().push(format!("commit {} {}", container_id, image));
            match self.behavior {
                Behavior::Fail => Err(AgentError::ContainerNotFound(container_id.to_string())),
                Behavior::Hang => std::future::pending().await,
                _ => Ok(()),
            }
        }

        async fn push_image_from_self(
            &self,
            image: &str,
            username: &str,
            _password: &str,
        ) -> Result<PushOutcome> {
            self.calls.lock().push(format!("push {} {}", image, username));
            match self.behavior {
                Behavior::Fail => Err(AgentError::InvalidReference(image.to_string())),
                Behavior::Hang => std::future::pending().await,
                Behavior::Ipfs => Ok(PushOutcome::Ipfs {
                    cid: "bafyroot".to_string(),
                }),
                Behavior::Ok => Ok(PushOutcome::Registry {
                    reference: image.to_string(),
                }),
            }
        }
    }

    struct FakeSelector {
        behavior: Option<Behavior>,
        selections: Mutex<usize>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeSelector {
        fn new(behavior: Option<Behavior>) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                selections: Mutex::new(0),
                calls: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    #[async_trait]
    impl ClientSelector for FakeSelector {
        async fn select(&self) -> Result<Box<dyn ContainerClient>> {
            *self.selections.lock() += 1;
            match self.behavior {
                Some(behavior) => Ok(Box::new(FakeClient {
                    behavior,
                    calls: self.calls.clone(),
                })),
                None => Err(AgentError::ClientInit {
                    runtime: "Docker".to_string(),
                    message: "daemon unreachable".to_string(),
                }),
            }
        }
    }

    fn operator(selector: Arc<FakeSelector>) -> Operator {
        Operator::new(selector, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_commit_success_message() {
        let selector = FakeSelector::new(Some(Behavior::Ok));
        let message = operator(selector.clone())
            .commit("abc123", "registry.local/team/nb:v1")
            .await
            .unwrap();

        assert_eq!(message, "Container save success, image: registry.local/team/nb:v1");
        assert_eq!(selector.calls.lock().as_slice(), ["commit abc123 registry.local/team/nb:v1"]);
    }

    #[tokio::test]
    async fn test_push_success_message() {
        let selector = FakeSelector::new(Some(Behavior::Ok));
        let message = operator(selector)
            .push("registry.local/team/nb:v1", "alice", "secret")
            .await
            .unwrap();
        assert_eq!(message, "Image pushed successfully: registry.local/team/nb:v1");
    }

    #[tokio::test]
    async fn test_ipfs_push_returns_cid() {
        let selector = FakeSelector::new(Some(Behavior::Ipfs));
        let message = operator(selector)
            .push("ipfs://nb:v1", "", "")
            .await
            .unwrap();
        assert_eq!(message, "bafyroot");
    }

    #[tokio::test]
    async fn test_client_init_error_propagates() {
        let selector = FakeSelector::new(None);
        let err = operator(selector.clone())
            .commit("abc123", "nb:v1")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::ClientInit { .. }));
        assert_eq!(err.to_string(), "Docker client init error: daemon unreachable");
        assert!(selector.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_operation_error_propagates_unchanged() {
        let selector = FakeSelector::new(Some(Behavior::Fail));
        let err = operator(selector)
            .commit("abc123", "nb:v1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no such container abc123");
    }

    #[tokio::test]
    async fn test_fresh_client_per_call() {
        let selector = FakeSelector::new(Some(Behavior::Ok));
        let operator = operator(selector.clone());

        operator.commit("abc123", "nb:v1").await.unwrap();
        operator.push("nb:v1", "", "").await.unwrap();

        assert_eq!(*selector.selections.lock(), 2);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout() {
        let selector = FakeSelector::new(Some(Behavior::Hang));
        let operator = Operator::new(selector, Duration::from_millis(20));

        let err = operator.push("nb:v1", "", "").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }
}
