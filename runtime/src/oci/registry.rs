//! OCI registry push.
//!
//! Uses the `oci-distribution` crate to upload content read from the local
//! containerd content store. Manifests and indexes are uploaded as the raw
//! bytes stored locally, so the registry ends up with the same digests.

use async_trait::async_trait;
use commit_agent_core::error::{AgentError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::reference::{ImageReference, DEFAULT_REGISTRY, DEFAULT_TAG};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Basic auth when a username was supplied, anonymous otherwise.
    pub fn from_parts(username: &str, password: &str) -> Self {
        if username.is_empty() {
            Self::anonymous()
        } else {
            Self::basic(username, password)
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Hands out the caller's credentials for exactly one registry domain.
///
/// The push is only ever meant to authenticate against the target
/// reference's registry; any other host asking for credentials is an error.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    domain: String,
    auth: RegistryAuth,
}

impl CredentialResolver {
    pub fn new(domain: impl Into<String>, username: &str, password: &str) -> Self {
        Self {
            domain: domain.into(),
            auth: RegistryAuth::from_parts(username, password),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Credentials for `host`, which must be the bound domain.
    pub fn credentials(&self, host: &str) -> Result<RegistryAuth> {
        if host == self.domain {
            Ok(self.auth.clone())
        } else {
            Err(AgentError::CredentialDomainMismatch {
                expected: self.domain.clone(),
                actual: host.to_string(),
            })
        }
    }
}

/// How a single push attempt talks to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// HTTPS, optionally without certificate verification
    Https { skip_verify: bool },
    /// Plain HTTP
    PlainHttp,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Https { skip_verify: false } => write!(f, "https"),
            TransportMode::Https { skip_verify: true } => write!(f, "https (skip verify)"),
            TransportMode::PlainHttp => write!(f, "http"),
        }
    }
}

/// A content-addressed blob as stored locally. Only the descriptor is held;
/// the bytes are read from a [`BlobSource`] when the blob is uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
}

/// Everything a push uploads.
#[derive(Debug, Clone)]
pub struct PushContent {
    /// Top-level manifest or index, pushed under the tag
    pub root: Blob,
    /// Platform manifests referenced by an index, pushed by digest
    pub manifests: Vec<Blob>,
    /// Config and layer blobs, deduplicated
    pub blobs: Vec<Blob>,
}

/// Local content a push reads blob bytes from.
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>>;
}

/// Uploads [`PushContent`] to a registry.
///
/// Credentials come from `resolver`, asked for the host the transport
/// actually authenticates against.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    async fn push(
        &self,
        target: &ImageReference,
        content: &PushContent,
        source: &dyn BlobSource,
        resolver: &CredentialResolver,
        mode: TransportMode,
    ) -> Result<()>;
}

/// [`RegistryTransport`] backed by `oci-distribution`.
#[derive(Debug, Default, Clone)]
pub struct OciRegistryTransport;

impl OciRegistryTransport {
    pub fn new() -> Self {
        Self
    }

    fn client(mode: TransportMode) -> Client {
        let config = match mode {
            TransportMode::Https { skip_verify } => ClientConfig {
                protocol: ClientProtocol::Https,
                accept_invalid_certificates: skip_verify,
                ..Default::default()
            },
            TransportMode::PlainHttp => ClientConfig {
                protocol: ClientProtocol::Http,
                accept_invalid_certificates: true,
                ..Default::default()
            },
        };
        Client::new(config)
    }
}

#[async_trait]
impl RegistryTransport for OciRegistryTransport {
    async fn push(
        &self,
        target: &ImageReference,
        content: &PushContent,
        source: &dyn BlobSource,
        resolver: &CredentialResolver,
        mode: TransportMode,
    ) -> Result<()> {
        let registry = target.registry.as_str();
        let client = Self::client(mode);
        let oci_ref = to_oci_reference(target)?;
        let auth = resolver.credentials(auth_domain(oci_ref.resolve_registry()))?;

        tracing::info!(
            reference = %target,
            mode = %mode,
            blobs = content.blobs.len(),
            manifests = content.manifests.len(),
            "Pushing image to registry"
        );

        client
            .auth(&oci_ref, &auth.to_oci_auth(), RegistryOperation::Push)
            .await
            .map_err(|e| classify_registry_error(registry, e))?;

        for blob in &content.blobs {
            tracing::debug!(digest = %blob.digest, size = blob.size, "Pushing blob");
            let data = source.read_blob(&blob.digest).await?;
            client
                .push_blob(&oci_ref, &data, &blob.digest)
                .await
                .map_err(|e| classify_registry_error(registry, e))?;
        }

        for manifest in &content.manifests {
            let by_digest = Reference::with_digest(
                oci_ref.registry().to_string(),
                oci_ref.repository().to_string(),
                manifest.digest.clone(),
            );
            let data = source.read_blob(&manifest.digest).await?;
            client
                .push_manifest_raw(&by_digest, data, header_value(&manifest.media_type)?)
                .await
                .map_err(|e| classify_registry_error(registry, e))?;
        }

        let root = source.read_blob(&content.root.digest).await?;
        let manifest_url = client
            .push_manifest_raw(&oci_ref, root, header_value(&content.root.media_type)?)
            .await
            .map_err(|e| classify_registry_error(registry, e))?;

        tracing::info!(
            reference = %target,
            digest = %content.root.digest,
            manifest_url = %manifest_url,
            "Image pushed successfully"
        );
        Ok(())
    }
}

/// Domain credentials are bound to for a registry host. Docker Hub is
/// served from aliases of `docker.io`.
pub fn auth_domain(host: &str) -> &str {
    match host {
        "index.docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY,
        other => other,
    }
}

/// Parse a media type into whatever header type the registry client wants.
fn header_value<V>(media_type: &str) -> Result<V>
where
    V: std::str::FromStr,
    V::Err: std::fmt::Display,
{
    media_type.parse::<V>().map_err(|e| {
        AgentError::Other(format!("invalid media type {:?}: {}", media_type, e))
    })
}

/// Convert an ImageReference to an oci-distribution Reference.
pub fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.tag, &reference.digest) {
        (_, Some(digest)) => format!("{}@{}", reference.name(), digest),
        (Some(tag), None) => format!("{}:{}", reference.name(), tag),
        (None, None) => format!("{}:{}", reference.name(), DEFAULT_TAG),
    };

    ref_str.parse::<Reference>().map_err(|e| {
        AgentError::InvalidReference(format!("{:?}: {}", ref_str, e))
    })
}

/// Sort a registry failure into auth vs transport by its kind, never by
/// its text: URLs and ports can look like status codes.
pub fn classify_registry_error(registry: &str, err: OciDistributionError) -> AgentError {
    let message = err.to_string();
    if is_auth_failure(&err) {
        AgentError::RegistryAuth {
            registry: registry.to_string(),
            message,
        }
    } else {
        AgentError::RegistryTransport {
            registry: registry.to_string(),
            message,
        }
    }
}

fn is_auth_failure(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::AuthenticationFailure(_)
        | OciDistributionError::UnauthorizedError { .. } => true,
        OciDistributionError::ServerError { code, .. } => matches!(*code, 401 | 403),
        OciDistributionError::RegistryError { envelope, .. } => envelope
            .errors
            .iter()
            .any(|e| matches!(e.code, OciErrorCode::Unauthorized | OciErrorCode::Denied)),
        _ => false,
    }
}

/// Whether a failed HTTPS attempt looks like the registry only speaks plain
/// HTTP (or is not listening on the TLS port at all).
pub fn is_plain_http_error(err: &AgentError) -> bool {
    let message = match err {
        AgentError::RegistryTransport { message, .. } => message.to_lowercase(),
        _ => return false,
    };
    [
        "http response to https client",
        "wrong version number",
        "invalidcontenttype",
        "corrupt message",
        "connection refused",
    ]
    .iter()
    .any(|marker| message.contains(marker))
}
