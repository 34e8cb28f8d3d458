//! containerd image push.
//!
//! Flow for a registry reference:
//! 1. Reduce the local image to the selected platforms (temporary image).
//! 2. Collect the manifests and blobs to upload from the content store.
//! 3. Push over HTTPS, falling back to plain HTTP once for insecure registries.
//! 4. Sign `<reference>@<digest>`.
//!
//! `ipfs://` references are added to IPFS instead and yield the root CID.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use commit_agent_core::config::AgentConfig;
use commit_agent_core::error::{AgentError, Result};

use super::content::{is_index, is_manifest, is_nondistributable, parse_index, parse_manifest, Descriptor, ImageContentStore};
use super::convert::{TempImage, REDUCED_PLATFORM_SUFFIX};
use super::ipfs::{self, HttpIpfsApi, IpfsApi};
use crate::client::PushOutcome;
use crate::oci::registry::is_plain_http_error;
use crate::oci::{
    Blob, BlobSource, CredentialResolver, ImageReference, PlatformMatcher, PushContent,
    RegistryTransport, TransportMode,
};
use crate::sign::Signer;

const IPFS_SCHEME: &str = "ipfs";

/// Push settings taken from the agent configuration.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub insecure_registry: bool,
    pub platforms: Vec<String>,
    pub all_platforms: bool,
    pub allow_nondistributable_artifacts: bool,
    pub ipfs_address: Option<String>,
}

impl From<&AgentConfig> for PushOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            insecure_registry: config.insecure_registry,
            platforms: config.platforms.clone(),
            all_platforms: config.all_platforms,
            allow_nondistributable_artifacts: config.allow_nondistributable_artifacts,
            ipfs_address: config.ipfs_address.clone(),
        }
    }
}

/// Pushes images out of one containerd namespace.
pub struct Pusher {
    store: Arc<dyn ImageContentStore>,
    transport: Arc<dyn RegistryTransport>,
    signer: Arc<dyn Signer>,
    options: PushOptions,
}

impl Pusher {
    pub fn new(
        store: Arc<dyn ImageContentStore>,
        transport: Arc<dyn RegistryTransport>,
        signer: Arc<dyn Signer>,
        options: PushOptions,
    ) -> Self {
        Self {
            store,
            transport,
            signer,
            options,
        }
    }

    pub async fn push(&self, raw_ref: &str, username: &str, password: &str) -> Result<PushOutcome> {
        if let Some((scheme, reference)) = raw_ref.split_once("://") {
            if scheme != IPFS_SCHEME {
                return Err(AgentError::InvalidReference(format!(
                    "ipfs scheme is only supported but got {:?}",
                    scheme
                )));
            }
            return self.push_ipfs(reference).await;
        }

        let reference = ImageReference::parse(raw_ref)?;
        let matcher = PlatformMatcher::new(self.options.all_platforms, &self.options.platforms)?;
        let name = reference.full_reference();

        if matcher.is_all() {
            return self.push_registry(&reference, &name, &matcher, username, password).await;
        }

        let temp_name = format!("{}{}", name, REDUCED_PLATFORM_SUFFIX);
        let temp = TempImage::create(self.store.clone(), &name, &temp_name, &matcher)
            .await
            .map_err(|e| self.temp_image_error(&temp_name, e))?;

        let result = self
            .push_registry(&reference, temp.name(), &matcher, username, password)
            .await;

        if let Err(e) = temp.remove().await {
            tracing::warn!(image = %temp_name, error = %e, "Failed to remove temporary image");
        }
        result
    }

    fn temp_image_error(&self, temp_name: &str, err: AgentError) -> AgentError {
        match err {
            AgentError::Platform(message) if self.options.platforms.is_empty() => {
                AgentError::Platform(format!(
                    "failed to create a tmp single-platform image {:?}: {}",
                    temp_name, message
                ))
            }
            AgentError::Platform(message) => AgentError::Platform(format!(
                "failed to create a tmp reduced-platform image {:?} (platform={:?}): {}",
                temp_name, self.options.platforms, message
            )),
            other => other,
        }
    }

    async fn push_ipfs(&self, reference: &str) -> Result<PushOutcome> {
        tracing::info!(reference, "pushing image to IPFS");
        let matcher = PlatformMatcher::new(self.options.all_platforms, &self.options.platforms)?;

        // An explicit address is staged as a throwaway repo holding only `api`.
        let staged = match self.options.ipfs_address {
            Some(ref address) => Some(ipfs::stage_api_dir(address)?),
            None => None,
        };
        let repo: Option<PathBuf> = staged.as_ref().map(|dir| dir.path().to_path_buf());
        let api = HttpIpfsApi::from_repo(repo.as_deref())?;

        let cid = ipfs::push_image(self.store.as_ref(), &api as &dyn IpfsApi, reference, &matcher)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "ipfs push failed");
                e
            })?;
        Ok(PushOutcome::Ipfs { cid })
    }

    /// Push the local image `local_name` as `reference`, then sign it.
    async fn push_registry(
        &self,
        reference: &ImageReference,
        local_name: &str,
        matcher: &PlatformMatcher,
        username: &str,
        password: &str,
    ) -> Result<PushOutcome> {
        let domain = reference.domain();
        let image = self.store.get_image(local_name).await?;
        let content = collect_content(
            self.store.as_ref(),
            &image.target,
            matcher,
            self.options.allow_nondistributable_artifacts,
        )
        .await?;

        let resolver = CredentialResolver::new(domain, username, password);
        let source = StoreBlobs(self.store.as_ref());

        if self.options.insecure_registry {
            tracing::warn!(registry = %domain, "skipping verifying HTTPS certs");
        }
        let https = TransportMode::Https {
            skip_verify: self.options.insecure_registry,
        };

        if let Err(err) = self
            .transport
            .push(reference, &content, &source, &resolver, https)
            .await
        {
            if !is_plain_http_error(&err) {
                return Err(err);
            }
            if !self.options.insecure_registry {
                tracing::error!(registry = %domain, error = %err, "server does not seem to support HTTPS");
                tracing::info!("Hint: enable insecure_registry to allow plain HTTP (if you are in a trusted network)");
                return Err(err);
            }
            tracing::warn!(
                registry = %domain,
                error = %err,
                "server does not seem to support HTTPS, falling back to plain HTTP"
            );
            self.transport
                .push(reference, &content, &source, &resolver, TransportMode::PlainHttp)
                .await?;
        }

        let pushed = self.store.get_image(local_name).await?;
        let sign_ref = reference.with_digest(&pushed.target.digest).to_string();
        self.signer.sign(&sign_ref).await?;

        Ok(PushOutcome::Registry {
            reference: reference.full_reference(),
        })
    }
}

/// Blob bytes for the transport, read from the content store on demand.
struct StoreBlobs<'a>(&'a dyn ImageContentStore);

#[async_trait]
impl BlobSource for StoreBlobs<'_> {
    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.0.read_blob(digest).await
    }
}

fn blob(descriptor: &Descriptor) -> Blob {
    Blob {
        media_type: descriptor.media_type.clone(),
        digest: descriptor.digest.clone(),
        size: descriptor.size,
    }
}

/// Descriptors of everything under `root` that a registry push uploads.
/// Only manifests and indexes are read; config and layer bytes are left in
/// the store until the transport uploads them.
pub async fn collect_content(
    store: &dyn ImageContentStore,
    root: &Descriptor,
    matcher: &PlatformMatcher,
    allow_nondistributable: bool,
) -> Result<PushContent> {
    let mut content = PushContent {
        root: blob(root),
        manifests: Vec::new(),
        blobs: Vec::new(),
    };
    let mut seen = HashSet::new();

    if is_manifest(&root.media_type) {
        let data = store.read_blob(&root.digest).await?;
        collect_manifest_blobs(&data, allow_nondistributable, &mut seen, &mut content)?;
        return Ok(content);
    }
    if !is_index(&root.media_type) {
        return Err(AgentError::Platform(format!(
            "unsupported media type {:?}",
            root.media_type
        )));
    }

    let index = parse_index(&store.read_blob(&root.digest).await?)?;
    let manifests = index
        .manifests
        .into_iter()
        .filter(|m| is_manifest(&m.media_type) && matcher.matches(m.platform.as_ref()));
    for manifest in manifests {
        let data = store.read_blob(&manifest.digest).await?;
        collect_manifest_blobs(&data, allow_nondistributable, &mut seen, &mut content)?;
        content.manifests.push(blob(&manifest));
    }

    Ok(content)
}

fn collect_manifest_blobs(
    manifest: &[u8],
    allow_nondistributable: bool,
    seen: &mut HashSet<String>,
    content: &mut PushContent,
) -> Result<()> {
    let manifest = parse_manifest(manifest)?;
    let descriptors = std::iter::once(manifest.config).chain(manifest.layers);

    for descriptor in descriptors {
        if is_nondistributable(&descriptor.media_type) && !allow_nondistributable {
            tracing::debug!(digest = %descriptor.digest, "Skipping non-distributable layer");
            continue;
        }
        if !seen.insert(descriptor.digest.clone()) {
            continue;
        }
        content.blobs.push(blob(&descriptor));
    }
    Ok(())
}
