//! containerd container commit.
//!
//! The container's writable layer is the diff between a view of its parent
//! snapshot and its active snapshot. That layer is appended to the base
//! image's config and manifest, and the result is stored as a new image. All
//! writes happen under a lease so nothing is collected before the image
//! record references it.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use commit_agent_core::error::{AgentError, Result};
use serde_json::{json, Value};

use super::api::ContainerdApi;
use super::content::{
    gc_labels, parse_manifest, parse_object, Descriptor, ImageContentStore, ImageRecord,
    LABEL_UNCOMPRESSED, MEDIA_TYPE_DOCKER_LAYER_GZIP, MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_OCI_LAYER_GZIP,
};
use super::convert::resolve_manifest;
use super::walker::ContainerSummary;
use crate::oci::{ImageReference, PlatformMatcher};

/// Commit `container` as the image `reference`.
pub async fn commit_container(
    api: &ContainerdApi,
    container: &ContainerSummary,
    reference: &ImageReference,
) -> Result<ImageRecord> {
    let lease = api.create_lease().await?;
    let leased = api.with_lease(&lease);

    let result = commit_with_lease(&leased, container, reference).await;

    if let Err(e) = api.delete_lease(&lease).await {
        tracing::warn!(lease = %lease, error = %e, "Failed to release lease");
    }
    result
}

async fn commit_with_lease(
    api: &ContainerdApi,
    container: &ContainerSummary,
    reference: &ImageReference,
) -> Result<ImageRecord> {
    let base = api.get_image(&container.image).await?;
    let manifest_desc = resolve_manifest(api, &base.target, &PlatformMatcher::host()).await?;
    let manifest_data = api.read_blob(&manifest_desc.digest).await?;
    let manifest = parse_manifest(&manifest_data)?;
    let config_data = api.read_blob(&manifest.config.digest).await?;

    let layer_media_type = layer_media_type(&manifest_desc.media_type);
    let layer = diff_container(api, container, layer_media_type).await?;

    let diff_id = api
        .blob_labels(&layer.digest)
        .await?
        .remove(LABEL_UNCOMPRESSED)
        .ok_or_else(|| {
            AgentError::runtime(
                "Containerd",
                format!("layer {} has no {} label", layer.digest, LABEL_UNCOMPRESSED),
            )
        })?;
    tracing::debug!(layer = %layer.digest, diff_id = %diff_id, "Container layer created");

    let config = append_layer_to_config(&config_data, &diff_id, Utc::now())?;
    let config_desc = api
        .write_blob(&manifest.config.media_type, config, HashMap::new())
        .await?;

    let (manifest_bytes, layers) = append_layer_to_manifest(&manifest_data, &config_desc, &layer)?;
    let new_manifest = api
        .write_blob(
            &manifest_desc.media_type,
            manifest_bytes,
            gc_labels(Some(&config_desc), &layers, "l"),
        )
        .await?;

    let record = api
        .create_image(ImageRecord {
            name: reference.full_reference(),
            target: new_manifest,
            labels: HashMap::new(),
        })
        .await?;

    tracing::info!(
        container = %container.id,
        image = %record.name,
        digest = %record.target.digest,
        "Container committed"
    );
    Ok(record)
}

/// Diff a read-only view of the parent against the container's snapshot.
async fn diff_container(
    api: &ContainerdApi,
    container: &ContainerSummary,
    media_type: &str,
) -> Result<Descriptor> {
    let snapshotter = container.snapshotter.as_str();
    let parent = api.snapshot_parent(snapshotter, &container.snapshot_key).await?;
    let upper = api.snapshot_mounts(snapshotter, &container.snapshot_key).await?;

    let view_key = format!("{}-view-{}", container.id, uuid::Uuid::new_v4());
    let lower = api.view_snapshot(snapshotter, &view_key, &parent).await?;

    let diff_ref = format!("commit-agent-diff-{}", uuid::Uuid::new_v4());
    let result = api.diff(lower, upper, media_type, &diff_ref).await;

    if let Err(e) = api.remove_snapshot(snapshotter, &view_key).await {
        tracing::warn!(key = %view_key, error = %e, "Failed to remove view snapshot");
    }
    result
}

/// Layer media type of the base manifest's family.
fn layer_media_type(manifest_media_type: &str) -> &'static str {
    if manifest_media_type == MEDIA_TYPE_DOCKER_MANIFEST {
        MEDIA_TYPE_DOCKER_LAYER_GZIP
    } else {
        MEDIA_TYPE_OCI_LAYER_GZIP
    }
}

/// Add the new layer's diff ID and a history entry to an image config.
pub fn append_layer_to_config(
    config: &[u8],
    diff_id: &str,
    created: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let mut config = parse_object(config)?;
    let created = created.to_rfc3339_opts(SecondsFormat::Nanos, true);

    if !config["rootfs"].is_object() {
        config["rootfs"] = json!({ "type": "layers", "diff_ids": [] });
    }
    match config["rootfs"]["diff_ids"].as_array_mut() {
        Some(diff_ids) => diff_ids.push(Value::from(diff_id)),
        None => config["rootfs"]["diff_ids"] = json!([diff_id]),
    }

    let entry = json!({ "created": created });
    match config["history"].as_array_mut() {
        Some(history) => history.push(entry),
        None => config["history"] = json!([entry]),
    }
    config["created"] = Value::from(created);

    Ok(serde_json::to_vec(&config)?)
}

/// Point a manifest at the new config and append the new layer. Returns the
/// manifest bytes and its full layer list. Base layer entries are kept as
/// stored, annotations and urls included.
pub fn append_layer_to_manifest(
    manifest: &[u8],
    config: &Descriptor,
    layer: &Descriptor,
) -> Result<(Vec<u8>, Vec<Descriptor>)> {
    let mut value = parse_object(manifest)?;
    let mut layers = parse_manifest(manifest)?.layers;
    layers.push(layer.clone());

    value["config"] = serde_json::to_value(config)?;
    let new_layer = serde_json::to_value(layer)?;
    match value["layers"].as_array_mut() {
        Some(entries) => entries.push(new_layer),
        None => value["layers"] = Value::Array(vec![new_layer]),
    }

    Ok((serde_json::to_vec(&value)?, layers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containerd::content::{
        MEDIA_TYPE_DOCKER_FOREIGN_LAYER, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_MANIFEST,
    };
    use chrono::TimeZone;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_append_layer_to_config() {
        let base = json!({
            "architecture": "amd64",
            "os": "linux",
            "config": {"Env": ["PATH=/usr/bin"]},
            "rootfs": {"type": "layers", "diff_ids": ["sha256:base"]},
            "history": [{"created_by": "/bin/sh -c #(nop) ADD file"}]
        });
        let out = append_layer_to_config(&serde_json::to_vec(&base).unwrap(), "sha256:new", created()).unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(out["rootfs"]["diff_ids"], json!(["sha256:base", "sha256:new"]));
        assert_eq!(out["history"].as_array().unwrap().len(), 2);
        assert_eq!(out["history"][1]["created"], "2024-05-01T12:00:00.000000000Z");
        assert_eq!(out["created"], "2024-05-01T12:00:00.000000000Z");
        assert_eq!(out["config"]["Env"][0], "PATH=/usr/bin");
    }

    #[test]
    fn test_append_layer_to_config_without_history() {
        let base = json!({"architecture": "arm64", "os": "linux"});
        let out = append_layer_to_config(&serde_json::to_vec(&base).unwrap(), "sha256:new", created()).unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(out["rootfs"]["type"], "layers");
        assert_eq!(out["rootfs"]["diff_ids"], json!(["sha256:new"]));
        assert_eq!(out["history"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_append_layer_to_manifest() {
        let base = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": {"mediaType": MEDIA_TYPE_OCI_CONFIG, "digest": "sha256:oldcfg", "size": 10},
            "layers": [{"mediaType": MEDIA_TYPE_OCI_LAYER_GZIP, "digest": "sha256:l0", "size": 100}],
            "annotations": {"org.opencontainers.image.base.name": "python:3.11"}
        });
        let config = Descriptor::new(MEDIA_TYPE_OCI_CONFIG, "sha256:newcfg", 12);
        let layer = Descriptor::new(MEDIA_TYPE_OCI_LAYER_GZIP, "sha256:l1", 200);

        let (bytes, layers) =
            append_layer_to_manifest(&serde_json::to_vec(&base).unwrap(), &config, &layer).unwrap();
        let out: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(layers.len(), 2);
        assert_eq!(out["config"]["digest"], "sha256:newcfg");
        assert_eq!(out["layers"][1]["digest"], "sha256:l1");
        assert_eq!(out["layers"][1]["size"], 200);
        assert_eq!(out["schemaVersion"], 2);
        assert_eq!(
            out["annotations"]["org.opencontainers.image.base.name"],
            "python:3.11"
        );
        assert!(out["layers"][0].get("platform").is_none());
    }

    #[test]
    fn test_append_layer_keeps_base_layer_metadata() {
        let base = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": {"mediaType": MEDIA_TYPE_OCI_CONFIG, "digest": "sha256:oldcfg", "size": 10},
            "layers": [
                {"mediaType": MEDIA_TYPE_OCI_LAYER_GZIP, "digest": "sha256:l0", "size": 100,
                 "annotations": {"containerd.io/snapshot/stargz/toc.digest": "sha256:toc"}},
                {"mediaType": MEDIA_TYPE_DOCKER_FOREIGN_LAYER, "digest": "sha256:win", "size": 300,
                 "urls": ["https://mcr.microsoft.com/v2/windows/blobs/sha256:win"]}
            ]
        });
        let config = Descriptor::new(MEDIA_TYPE_OCI_CONFIG, "sha256:newcfg", 12);
        let layer = Descriptor::new(MEDIA_TYPE_OCI_LAYER_GZIP, "sha256:l2", 200);

        let (bytes, layers) =
            append_layer_to_manifest(&serde_json::to_vec(&base).unwrap(), &config, &layer).unwrap();
        let out: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(layers.len(), 3);
        assert_eq!(out["layers"][0], base["layers"][0]);
        assert_eq!(out["layers"][1], base["layers"][1]);
        assert_eq!(
            out["layers"][0]["annotations"]["containerd.io/snapshot/stargz/toc.digest"],
            "sha256:toc"
        );
        assert_eq!(out["layers"][1]["urls"][0], "https://mcr.microsoft.com/v2/windows/blobs/sha256:win");
        assert_eq!(out["layers"][2]["digest"], "sha256:l2");
    }

    #[test]
    fn test_append_layer_to_manifest_without_layers() {
        let base = json!({
            "schemaVersion": 2,
            "config": {"mediaType": MEDIA_TYPE_OCI_CONFIG, "digest": "sha256:oldcfg", "size": 10}
        });
        let config = Descriptor::new(MEDIA_TYPE_OCI_CONFIG, "sha256:newcfg", 12);
        let layer = Descriptor::new(MEDIA_TYPE_OCI_LAYER_GZIP, "sha256:l0", 200);

        let (bytes, layers) =
            append_layer_to_manifest(&serde_json::to_vec(&base).unwrap(), &config, &layer).unwrap();
        let out: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(layers.len(), 1);
        assert_eq!(out["layers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_layer_media_type_follows_manifest() {
        assert_eq!(
            layer_media_type(MEDIA_TYPE_DOCKER_MANIFEST),
            MEDIA_TYPE_DOCKER_LAYER_GZIP
        );
        assert_eq!(layer_media_type(MEDIA_TYPE_OCI_MANIFEST), MEDIA_TYPE_OCI_LAYER_GZIP);
    }
}
