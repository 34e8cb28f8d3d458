//! Commit Agent Runtime - container runtime clients and image operations.
//!
//! Provides:
//! - Runtime selection between Docker and containerd
//! - Container commit and image push for both runtimes
//! - OCI reference parsing, platform matching and registry push
//! - Post-push image signing

pub mod client;
pub mod containerd;
pub mod docker;
pub mod oci;
pub mod operate;
pub mod select;
pub mod sign;

pub use client::{ContainerClient, PushOutcome, RuntimeKind};
pub use operate::Operator;
pub use select::{detect_runtime, select_client, ClientSelector, HostClientSelector};
pub use sign::{signer_for, Signer};
