//! Push to IPFS.
//!
//! Every config and layer blob is added to IPFS and the manifests are
//! rewritten so each descriptor carries an `ipfs://<cid>` URL. The CID of the
//! rewritten root is the result of the push.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use commit_agent_core::error::{AgentError, Result};
use serde::Deserialize;
use serde_json::Value;

use super::content::{
    is_index, is_manifest, parse_index, parse_object, sha256_digest, ImageContentStore,
};
use crate::oci::{ImageReference, PlatformMatcher};

/// File in an IPFS repo holding the API multiaddr.
const API_FILE: &str = "api";

/// Add endpoint of the kubo HTTP API.
const ADD_PATH: &str = "api/v0/add?pin=true&cid-version=1";

/// Minimal IPFS API surface.
#[async_trait]
pub trait IpfsApi: Send + Sync {
    /// Add `data` and return its CID.
    async fn add(&self, data: Vec<u8>) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// IPFS node reached over its HTTP API.
pub struct HttpIpfsApi {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpIpfsApi {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Read the API address from an IPFS repo: `ipfs_path` when given, else
    /// `$IPFS_PATH`, else `~/.ipfs`.
    pub fn from_repo(ipfs_path: Option<&Path>) -> Result<Self> {
        let repo = match ipfs_path {
            Some(path) => path.to_path_buf(),
            None => default_repo_path()?,
        };
        let api_file = repo.join(API_FILE);
        let address = std::fs::read_to_string(&api_file).map_err(|e| {
            AgentError::Ipfs(format!(
                "failed to read IPFS API address from {}: {}",
                api_file.display(),
                e
            ))
        })?;
        Ok(Self::new(api_url(&address)?))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IpfsApi for HttpIpfsApi {
    async fn add(&self, data: Vec<u8>) -> Result<String> {
        let url = format!("{}/{}", self.endpoint, ADD_PATH);
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(data).file_name("blob"));

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AgentError::Ipfs(format!("add to {} failed: {}", self.endpoint, e)))?;

        if !response.status().is_success() {
            return Err(AgentError::Ipfs(format!(
                "IPFS API returned {} for add",
                response.status()
            )));
        }

        let body: AddResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Ipfs(format!("invalid add response: {}", e)))?;
        Ok(body.hash)
    }
}

/// Temporary IPFS repo directory holding only an `api` file with `address`.
pub fn stage_api_dir(address: &str) -> Result<tempfile::TempDir> {
    let dir = tempfile::Builder::new().prefix("apidirtmp").tempdir()?;
    let api_file = dir.path().join(API_FILE);
    std::fs::write(&api_file, address)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&api_file, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(dir)
}

fn default_repo_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("IPFS_PATH") {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".ipfs"))
        .ok_or_else(|| AgentError::Ipfs("cannot determine IPFS repo: no home directory".to_string()))
}

/// HTTP base URL for an API address given as a URL or a multiaddr
/// (`/ip4/127.0.0.1/tcp/5001`, `/dns4/ipfs/tcp/5001/https`).
pub fn api_url(address: &str) -> Result<String> {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        return Ok(address.trim_end_matches('/').to_string());
    }

    let parts: Vec<&str> = address.split('/').filter(|p| !p.is_empty()).collect();
    let invalid = || AgentError::Ipfs(format!("unsupported IPFS API address {:?}", address));

    let (host, rest) = match parts.as_slice() {
        ["ip4" | "dns" | "dns4" | "dns6", host, rest @ ..] => (host.to_string(), rest),
        ["ip6", host, rest @ ..] => (format!("[{}]", host), rest),
        _ => return Err(invalid()),
    };
    let (port, scheme) = match rest {
        ["tcp", port] => (*port, "http"),
        ["tcp", port, "http"] => (*port, "http"),
        ["tcp", port, "https"] => (*port, "https"),
        _ => return Err(invalid()),
    };
    if port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(format!("{}://{}:{}", scheme, host, port))
}

/// Add the local image `image` to IPFS and return the root CID.
pub async fn push_image(
    store: &dyn ImageContentStore,
    ipfs: &dyn IpfsApi,
    image: &str,
    matcher: &PlatformMatcher,
) -> Result<String> {
    let reference = ImageReference::parse(image)?;
    let record = store.get_image(&reference.full_reference()).await?;
    let root = record.target;

    if is_manifest(&root.media_type) {
        let (_, cid) = add_manifest(store, ipfs, &root.media_type, &root.digest).await?;
        return Ok(cid);
    }
    if !is_index(&root.media_type) {
        return Err(AgentError::Ipfs(format!(
            "unsupported media type {:?}",
            root.media_type
        )));
    }

    let data = store.read_blob(&root.digest).await?;
    let entries = parse_index(&data)?.manifests;
    let mut index = parse_object(&data)?;
    let raw_entries = index["manifests"].as_array().cloned().unwrap_or_default();

    let mut rewritten = Vec::new();
    for (entry, raw) in entries.iter().zip(raw_entries) {
        if !is_manifest(&entry.media_type) || !matcher.matches(entry.platform.as_ref()) {
            continue;
        }
        let (bytes, cid) = add_manifest(store, ipfs, &entry.media_type, &entry.digest).await?;
        let mut raw = raw;
        raw["digest"] = Value::from(sha256_digest(&bytes));
        raw["size"] = Value::from(bytes.len() as i64);
        set_urls(&mut raw, &cid);
        rewritten.push(raw);
    }
    if rewritten.is_empty() {
        return Err(AgentError::Platform(format!(
            "no manifest of {} matches {}",
            image, matcher
        )));
    }

    index["manifests"] = Value::Array(rewritten);
    let cid = ipfs.add(serde_json::to_vec(&index)?).await?;
    tracing::info!(image, cid = %cid, "Pushed image to IPFS");
    Ok(cid)
}

/// Add a manifest's blobs, then the rewritten manifest itself.
async fn add_manifest(
    store: &dyn ImageContentStore,
    ipfs: &dyn IpfsApi,
    media_type: &str,
    digest: &str,
) -> Result<(Vec<u8>, String)> {
    let mut manifest = parse_object(&store.read_blob(digest).await?)?;

    add_descriptor(store, ipfs, &mut manifest["config"]).await?;
    if let Some(layers) = manifest["layers"].as_array_mut() {
        for layer in layers.iter_mut() {
            add_descriptor(store, ipfs, layer).await?;
        }
    }

    let bytes = serde_json::to_vec(&manifest)?;
    let cid = ipfs.add(bytes.clone()).await?;
    tracing::debug!(digest, media_type, cid = %cid, "Added manifest to IPFS");
    Ok((bytes, cid))
}

async fn add_descriptor(
    store: &dyn ImageContentStore,
    ipfs: &dyn IpfsApi,
    descriptor: &mut Value,
) -> Result<()> {
    let digest = descriptor["digest"]
        .as_str()
        .ok_or_else(|| AgentError::Serialization("descriptor without digest".to_string()))?
        .to_string();
    let cid = ipfs.add(store.read_blob(&digest).await?).await?;
    set_urls(descriptor, &cid);
    Ok(())
}

fn set_urls(descriptor: &mut Value, cid: &str) {
    descriptor["urls"] = Value::Array(vec![Value::from(format!("ipfs://{}", cid))]);
}
