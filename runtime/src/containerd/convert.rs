//! Reduced-platform image conversion.
//!
//! A push of selected platforms goes through a temporary image whose index
//! lists only those platforms. The temporary image is removed after the push
//! on every path; [`TempImage`] schedules the delete if it is dropped first.

use std::sync::Arc;

use commit_agent_core::error::{AgentError, Result};

use super::content::{
    gc_labels, is_index, is_manifest, parse_index, parse_manifest, parse_object, Descriptor,
    ImageContentStore, ImageRecord,
};
use crate::oci::{ImagePlatform, PlatformMatcher};

/// Suffix of the temporary image a reduced-platform push goes through.
pub const REDUCED_PLATFORM_SUFFIX: &str = "-tmp-reduced-platform";

/// Create `target` as a copy of `source` limited to the platforms `matcher`
/// accepts.
pub async fn convert_platforms(
    store: &dyn ImageContentStore,
    source: &str,
    target: &str,
    matcher: &PlatformMatcher,
) -> Result<ImageRecord> {
    let image = store.get_image(source).await?;
    let root = image.target.clone();

    let new_root = if is_index(&root.media_type) {
        reduce_index(store, &root, matcher).await?
    } else if is_manifest(&root.media_type) {
        let platform = manifest_platform(store, &root).await?;
        if !matcher.matches(Some(&platform)) {
            return Err(AgentError::Platform(format!(
                "image {:?} is {}/{}, which does not match {}",
                source, platform.os, platform.architecture, matcher
            )));
        }
        root
    } else {
        return Err(AgentError::Platform(format!(
            "image {:?} has unsupported media type {:?}",
            source, root.media_type
        )));
    };

    store
        .create_image(ImageRecord {
            name: target.to_string(),
            target: new_root,
            labels: image.labels,
        })
        .await
}

/// Platform recorded in a manifest's config blob.
pub async fn manifest_platform(
    store: &dyn ImageContentStore,
    manifest: &Descriptor,
) -> Result<ImagePlatform> {
    let manifest = parse_manifest(&store.read_blob(&manifest.digest).await?)?;
    let config = store.read_blob(&manifest.config.digest).await?;
    serde_json::from_slice(&config)
        .map_err(|e| AgentError::Serialization(format!("invalid image config: {}", e)))
}

/// Manifest of `root` for the first platform `matcher` accepts.
pub async fn resolve_manifest(
    store: &dyn ImageContentStore,
    root: &Descriptor,
    matcher: &PlatformMatcher,
) -> Result<Descriptor> {
    if is_manifest(&root.media_type) {
        return Ok(root.clone());
    }
    if !is_index(&root.media_type) {
        return Err(AgentError::Platform(format!(
            "unsupported media type {:?}",
            root.media_type
        )));
    }
    let index = parse_index(&store.read_blob(&root.digest).await?)?;
    index
        .manifests
        .into_iter()
        .find(|m| is_manifest(&m.media_type) && matcher.matches(m.platform.as_ref()))
        .ok_or_else(|| {
            AgentError::Platform(format!("no manifest in {} matches {}", root.digest, matcher))
        })
}

async fn reduce_index(
    store: &dyn ImageContentStore,
    root: &Descriptor,
    matcher: &PlatformMatcher,
) -> Result<Descriptor> {
    let data = store.read_blob(&root.digest).await?;
    let (reduced, kept) = filter_index(&data, matcher)?;
    if kept.is_empty() {
        return Err(AgentError::Platform(format!(
            "no manifest in {} matches {}",
            root.digest, matcher
        )));
    }

    match reduced {
        None => Ok(root.clone()),
        Some(bytes) => {
            let labels = gc_labels(None, &kept, "m");
            store.write_blob(&root.media_type, bytes, labels).await
        }
    }
}

/// Drop the index entries `matcher` rejects. Returns the re-encoded index
/// (`None` when nothing was dropped, so the original digest is kept) and the
/// kept entries.
pub fn filter_index(
    data: &[u8],
    matcher: &PlatformMatcher,
) -> Result<(Option<Vec<u8>>, Vec<Descriptor>)> {
    let doc = parse_index(data)?;
    let mut index = parse_object(data)?;

    let keep: Vec<bool> = doc
        .manifests
        .iter()
        .map(|m| matcher.matches(m.platform.as_ref()))
        .collect();
    let kept: Vec<Descriptor> = doc
        .manifests
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(m, _)| m.clone())
        .collect();

    if kept.len() == doc.manifests.len() {
        return Ok((None, kept));
    }

    if let Some(entries) = index["manifests"].as_array_mut() {
        let mut flags = keep.iter();
        entries.retain(|_| flags.next().copied().unwrap_or(false));
    }
    Ok((Some(serde_json::to_vec(&index)?), kept))
}

/// Temporary image that is deleted when the push is done with it.
pub struct TempImage {
    store: Arc<dyn ImageContentStore>,
    record: ImageRecord,
    released: bool,
}

impl TempImage {
    /// Convert `source` into the temporary image `name`. The reduced index
    /// is written under a lease that is held until the image references it.
    pub async fn create(
        store: Arc<dyn ImageContentStore>,
        source: &str,
        name: &str,
        matcher: &PlatformMatcher,
    ) -> Result<Self> {
        let lease = store.begin_lease().await?;
        let converted = convert_platforms(lease.store.as_ref(), source, name, matcher).await;
        if let Err(e) = store.release_lease(&lease.id).await {
            tracing::warn!(lease = %lease.id, error = %e, "Failed to release lease");
        }
        let record = converted?;
        tracing::info!(
            media_type = %record.target.media_type,
            digest = %record.target.digest,
            "pushing as a reduced-platform image"
        );
        Ok(Self {
            store,
            record,
            released: false,
        })
    }

    pub fn record(&self) -> &ImageRecord {
        &self.record
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Delete the image and wait for it.
    pub async fn remove(mut self) -> Result<()> {
        self.released = true;
        self.store.delete_image(&self.record.name).await?;
        tracing::debug!(image = %self.record.name, "Removed temporary image");
        Ok(())
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let name = self.record.name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.delete_image(&name).await {
                        tracing::warn!(image = %name, error = %e, "Failed to remove temporary image");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(image = %name, "No runtime to remove temporary image");
            }
        }
    }
}
