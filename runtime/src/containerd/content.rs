//! Image records and content blobs as the containerd stores see them.
//!
//! The push and conversion logic works against [`ImageContentStore`] so it
//! can run over the containerd services or an in-memory store in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use commit_agent_core::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::oci::ImagePlatform;

pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const MEDIA_TYPE_DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const MEDIA_TYPE_DOCKER_FOREIGN_LAYER: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
const MEDIA_TYPE_OCI_NONDISTRIBUTABLE_PREFIX: &str =
    "application/vnd.oci.image.layer.nondistributable.";

/// Label carrying the uncompressed digest (diff ID) of a layer blob.
pub const LABEL_UNCOMPRESSED: &str = "containerd.io/uncompressed";

/// Prefix of the labels that keep referenced content alive through GC.
pub const LABEL_GC_REF_CONTENT: &str = "containerd.io/gc.ref.content";

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<ImagePlatform>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            platform: None,
        }
    }
}

/// Entry in the containerd image store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Normalized reference (`docker.io/library/nginx:latest`)
    pub name: String,
    /// Root manifest or index
    pub target: Descriptor,
    pub labels: HashMap<String, String>,
}

/// Just the fields of a manifest the agent walks.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestDoc {
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// Just the fields of an index the agent walks.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexDoc {
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// View of a store whose writes are held by lease `id` until it is released.
pub struct Lease {
    pub id: String,
    pub store: Arc<dyn ImageContentStore>,
}

/// Image store plus content store of one namespace.
#[async_trait]
pub trait ImageContentStore: Send + Sync {
    /// Look up an image record by name.
    async fn get_image(&self, name: &str) -> Result<ImageRecord>;

    /// Create the record, replacing an existing one of the same name.
    async fn create_image(&self, image: ImageRecord) -> Result<ImageRecord>;

    /// Delete the record and wait for garbage collection.
    async fn delete_image(&self, name: &str) -> Result<()>;

    /// Read a whole blob.
    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>>;

    /// Labels attached to a blob.
    async fn blob_labels(&self, digest: &str) -> Result<HashMap<String, String>>;

    /// Write a blob with the given labels. Existing content is not an error.
    async fn write_blob(
        &self,
        media_type: &str,
        data: Vec<u8>,
        labels: HashMap<String, String>,
    ) -> Result<Descriptor>;

    /// Start a lease. Content written through [`Lease::store`] is not
    /// garbage collected before [`ImageContentStore::release_lease`].
    async fn begin_lease(&self) -> Result<Lease>;

    async fn release_lease(&self, id: &str) -> Result<()>;
}

/// `sha256:<hex>` of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

pub fn is_index(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_INDEX || media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST
}

pub fn is_manifest(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_MANIFEST || media_type == MEDIA_TYPE_DOCKER_MANIFEST
}

/// Foreign (Windows base) or OCI non-distributable layer.
pub fn is_nondistributable(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_DOCKER_FOREIGN_LAYER
        || media_type.starts_with(MEDIA_TYPE_OCI_NONDISTRIBUTABLE_PREFIX)
}

pub fn parse_manifest(data: &[u8]) -> Result<ManifestDoc> {
    serde_json::from_slice(data)
        .map_err(|e| AgentError::Serialization(format!("invalid image manifest: {}", e)))
}

pub fn parse_index(data: &[u8]) -> Result<IndexDoc> {
    serde_json::from_slice(data)
        .map_err(|e| AgentError::Serialization(format!("invalid image index: {}", e)))
}

/// Parse a JSON document that must be an object, for in-place edits.
pub fn parse_object(data: &[u8]) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(AgentError::Serialization(
            "expected a JSON object document".to_string(),
        ))
    }
}

/// GC reference labels for the children of a manifest or index, in the
/// `containerd.io/gc.ref.content.<kind>.<n>` form containerd uses.
pub fn gc_labels(config: Option<&Descriptor>, children: &[Descriptor], kind: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    if let Some(config) = config {
        labels.insert(format!("{}.config", LABEL_GC_REF_CONTENT), config.digest.clone());
    }
    for (i, child) in children.iter().enumerate() {
        labels.insert(
            format!("{}.{}.{}", LABEL_GC_REF_CONTENT, kind, i),
            child.digest.clone(),
        );
    }
    labels
}
