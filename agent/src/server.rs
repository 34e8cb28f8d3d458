//! gRPC server setup for the image service.
//!
//! Lifecycle: `Created` holds the address, `listen` unlinks any stale socket
//! and binds (`Listening`), `start` runs the accept loop on its own task
//! (`Serving`), `stop` drains in-flight RPCs (`Stopped`).

use std::sync::Arc;

use commit_agent_core::error::{AgentError, Result};
use commit_agent_runtime::Operator;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;

use crate::image_api::image_service_server::ImageServiceServer;
use crate::service::AgentImageService;
use crate::socket::SocketAddress;

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    Serving,
    Stopped,
}

/// Image service gRPC server on a Unix socket.
pub struct AgentServer {
    address: SocketAddress,
    operator: Arc<Operator>,
    state: ServerState,
    listener: Option<UnixListener>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AgentServer {
    pub fn new(address: SocketAddress, operator: Arc<Operator>) -> Self {
        Self {
            address,
            operator,
            state: ServerState::Created,
            listener: None,
            shutdown: None,
            task: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    /// Unlink a leftover socket file and bind the listener.
    pub fn listen(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Err(AgentError::Other(format!(
                "cannot listen in state {:?}",
                self.state
            )));
        }

        self.address.remove_stale().map_err(|e| {
            AgentError::Other(format!("failed to delete socket file, error: {}", e))
        })?;

        let listener = self.address.bind().map_err(|e| {
            AgentError::Other(format!("failed to start listener, error: {}", e))
        })?;

        tracing::info!(socket = %self.address, "Registered unix domain socket");
        self.listener = Some(listener);
        self.state = ServerState::Listening;
        Ok(())
    }

    /// Run the accept loop on a dedicated task.
    ///
    /// A fatal serve error arrives on the returned channel, which closes once
    /// the accept loop has ended.
    pub fn start(&mut self) -> Result<mpsc::Receiver<AgentError>> {
        if self.state == ServerState::Created {
            self.listen()?;
        }
        let listener = match (self.state, self.listener.take()) {
            (ServerState::Listening, Some(listener)) => listener,
            (state, _) => {
                return Err(AgentError::Other(format!(
                    "cannot start in state {:?}",
                    state
                )))
            }
        };

        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let service = AgentImageService::new(self.operator.clone());
        let incoming = UnixListenerStream::new(listener);

        let task = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(ImageServiceServer::new(service))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "Image server accept loop failed");
                let _ = errors_tx
                    .send(AgentError::Other(format!("image server failed: {}", e)))
                    .await;
            }
        });

        self.shutdown = Some(shutdown_tx);
        self.task = Some(task);
        self.state = ServerState::Serving;
        tracing::info!(socket = %self.address, "Image server started");
        Ok(errors_rx)
    }

    /// Stop accepting and wait for in-flight RPCs to finish.
    pub async fn stop(&mut self) {
        if self.state == ServerState::Stopped {
            return;
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Image server task did not exit cleanly");
            }
        }
        self.listener = None;

        if let Err(e) = self.address.remove_stale() {
            tracing::warn!(socket = %self.address, error = %e, "Failed to remove socket file");
        }

        self.state = ServerState::Stopped;
        tracing::info!(socket = %self.address, "Image server stopped");
    }
}
