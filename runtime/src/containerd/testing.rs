//! In-memory fakes of the content store and IPFS API for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use commit_agent_core::error::{AgentError, Result};
use parking_lot::Mutex;

use super::content::{
    sha256_digest, Descriptor, ImageContentStore, ImageRecord, Lease, MEDIA_TYPE_OCI_CONFIG,
    MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER_GZIP, MEDIA_TYPE_OCI_MANIFEST,
};
use super::ipfs::IpfsApi;
use crate::oci::ImagePlatform;

pub struct SeededManifest {
    pub manifest: Descriptor,
    pub config_digest: String,
    pub layer_digest: String,
}

#[derive(Default)]
struct MemoryState {
    images: Mutex<HashMap<String, ImageRecord>>,
    blobs: Mutex<HashMap<String, (Vec<u8>, HashMap<String, String>)>>,
    deleted: Mutex<Vec<String>>,
    reads: Mutex<Vec<String>>,
    leases: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
    leased_writes: Mutex<HashMap<String, String>>,
}

/// Shared in-memory store. Clones see the same content; a clone made by
/// `begin_lease` records its writes under that lease.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
    lease: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_blob(&self, media_type: &str, data: Vec<u8>) -> Descriptor {
        let digest = sha256_digest(&data);
        let size = data.len() as i64;
        self.state.blobs.lock().insert(digest.clone(), (data, HashMap::new()));
        Descriptor::new(media_type, digest, size)
    }

    pub fn put_image(&self, name: &str, target: Descriptor) {
        self.state.images.lock().insert(
            name.to_string(),
            ImageRecord {
                name: name.to_string(),
                target,
                labels: HashMap::new(),
            },
        );
    }

    /// Single-platform OCI image with one layer.
    pub fn seed_manifest(&self, arch: &str) -> SeededManifest {
        let layer = self.put_blob(MEDIA_TYPE_OCI_LAYER_GZIP, format!("layer-{}", arch).into_bytes());
        let config = serde_json::json!({
            "architecture": arch,
            "os": "linux",
            "rootfs": {"type": "layers", "diff_ids": [format!("sha256:{}", arch)]},
        });
        let config = self.put_blob(MEDIA_TYPE_OCI_CONFIG, serde_json::to_vec(&config).unwrap());
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": config,
            "layers": [layer],
        });
        let manifest = self.put_blob(MEDIA_TYPE_OCI_MANIFEST, serde_json::to_vec(&manifest).unwrap());
        SeededManifest {
            manifest,
            config_digest: config.digest,
            layer_digest: layer.digest,
        }
    }

    pub fn seed_image(&self, name: &str, arch: &str) -> SeededManifest {
        let seeded = self.seed_manifest(arch);
        self.put_image(name, seeded.manifest.clone());
        seeded
    }

    pub fn seed_index(&self, name: &str, arches: &[&str]) -> Descriptor {
        let manifests: Vec<Descriptor> = arches
            .iter()
            .map(|arch| {
                let mut manifest = self.seed_manifest(arch).manifest;
                manifest.platform = Some(ImagePlatform {
                    os: "linux".to_string(),
                    architecture: arch.to_string(),
                    variant: None,
                });
                manifest
            })
            .collect();
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": manifests,
        });
        let index = self.put_blob(MEDIA_TYPE_OCI_INDEX, serde_json::to_vec(&index).unwrap());
        self.put_image(name, index.clone());
        index
    }

    pub fn set_labels(&self, digest: &str, labels: HashMap<String, String>) {
        if let Some(entry) = self.state.blobs.lock().get_mut(digest) {
            entry.1 = labels;
        }
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.state.images.lock().contains_key(name)
    }

    pub fn image(&self, name: &str) -> Option<ImageRecord> {
        self.state.images.lock().get(name).cloned()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().clone()
    }

    pub fn blob(&self, digest: &str) -> Option<Vec<u8>> {
        self.state.blobs.lock().get(digest).map(|(data, _)| data.clone())
    }

    /// Digests read through the store trait, in order.
    pub fn reads(&self) -> Vec<String> {
        self.state.reads.lock().clone()
    }

    /// Every lease begun, in order.
    pub fn leases(&self) -> Vec<String> {
        self.state.leases.lock().clone()
    }

    pub fn released_leases(&self) -> Vec<String> {
        self.state.released.lock().clone()
    }

    /// Lease a blob was written under, if any.
    pub fn blob_lease(&self, digest: &str) -> Option<String> {
        self.state.leased_writes.lock().get(digest).cloned()
    }
}

#[async_trait]
impl ImageContentStore for MemoryStore {
    async fn get_image(&self, name: &str) -> Result<ImageRecord> {
        self.image(name)
            .ok_or_else(|| AgentError::runtime("Containerd", format!("image {:?}: not found", name)))
    }

    async fn create_image(&self, image: ImageRecord) -> Result<ImageRecord> {
        self.state.images.lock().insert(image.name.clone(), image.clone());
        Ok(image)
    }

    async fn delete_image(&self, name: &str) -> Result<()> {
        self.state.deleted.lock().push(name.to_string());
        match self.state.images.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(AgentError::runtime("Containerd", format!("image {:?}: not found", name))),
        }
    }

    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.state.reads.lock().push(digest.to_string());
        self.blob(digest)
            .ok_or_else(|| AgentError::runtime("Containerd", format!("content {}: not found", digest)))
    }

    async fn blob_labels(&self, digest: &str) -> Result<HashMap<String, String>> {
        self.state
            .blobs
            .lock()
            .get(digest)
            .map(|(_, labels)| labels.clone())
            .ok_or_else(|| AgentError::runtime("Containerd", format!("content {}: not found", digest)))
    }

    async fn write_blob(
        &self,
        media_type: &str,
        data: Vec<u8>,
        labels: HashMap<String, String>,
    ) -> Result<Descriptor> {
        let digest = sha256_digest(&data);
        let size = data.len() as i64;
        if let Some(ref lease) = self.lease {
            self.state.leased_writes.lock().insert(digest.clone(), lease.clone());
        }
        self.state.blobs.lock().insert(digest.clone(), (data, labels));
        Ok(Descriptor::new(media_type, digest, size))
    }

    async fn begin_lease(&self) -> Result<Lease> {
        let mut leases = self.state.leases.lock();
        let id = format!("lease-{}", leases.len());
        leases.push(id.clone());
        Ok(Lease {
            store: Arc::new(Self {
                state: self.state.clone(),
                lease: Some(id.clone()),
            }),
            id,
        })
    }

    async fn release_lease(&self, id: &str) -> Result<()> {
        self.state.released.lock().push(id.to_string());
        Ok(())
    }
}

/// Records every add and hands out `cid-<n>`.
#[derive(Default)]
pub struct FakeIpfs {
    added: Mutex<Vec<Vec<u8>>>,
}

impl FakeIpfs {
    pub fn added(&self) -> Vec<Vec<u8>> {
        self.added.lock().clone()
    }
}

#[async_trait]
impl IpfsApi for FakeIpfs {
    async fn add(&self, data: Vec<u8>) -> Result<String> {
        let mut added = self.added.lock();
        added.push(data);
        Ok(format!("cid-{}", added.len() - 1))
    }
}
