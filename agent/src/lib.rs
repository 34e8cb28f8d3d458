//! Commit Agent - gRPC image service on a node-local Unix socket.
//!
//! Serves `Version`, `CommitImage` and `PushImage` for the containers of the
//! node it runs on, dispatching to Docker or containerd per call.

pub mod client;
pub mod error;
pub mod server;
pub mod service;
pub mod socket;

/// Generated `v1beta1` image service types.
pub mod image_api {
    tonic::include_proto!("v1beta1");
}
