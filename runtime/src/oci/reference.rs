//! Docker-style image reference parsing.
//!
//! Parses references like `registry.example.com:5000/team/notebook:v1` into
//! structured components and normalizes them the way the Docker CLI does.

use commit_agent_core::error::{AgentError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Older spelling of the Docker Hub domain.
const LEGACY_DEFAULT_REGISTRY: &str = "index.docker.io";

/// Namespace Docker Hub uses for official images.
const OFFICIAL_REPO_PREFIX: &str = "library/";

/// Maximum tag length accepted by registries.
const MAX_TAG_LEN: usize = 128;

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "team/notebook")
    pub repository: String,
    /// Tag (e.g., "latest", "v1")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AgentError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }
        if reference.contains("://") {
            return Err(AgentError::InvalidReference(format!(
                "{:?}: scheme prefixes are not image references",
                reference
            )));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                validate_digest(reference, digest_part)?;
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; a colon before it
        // belongs to a registry port.
        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon_pos) => {
                let split = last_slash + colon_pos;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(ref t) = tag {
            validate_tag(reference, t)?;
        }

        let (registry, repository) = Self::split_registry_repository(name)?;
        validate_repository(reference, &repository)?;

        // Apply default tag if no tag and no digest
        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        // The first component is a registry when it looks like a hostname
        // (contains a dot or colon, or is "localhost").
        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                if rest.is_empty() {
                    return Err(AgentError::InvalidReference(format!(
                        "empty repository in reference {:?}",
                        name
                    )));
                }
                let registry = if first == LEGACY_DEFAULT_REGISTRY {
                    DEFAULT_REGISTRY
                } else {
                    first
                };
                (registry, rest)
            }
            _ => (DEFAULT_REGISTRY, name),
        };

        // Single-component Docker Hub names live under `library/`, whether
        // or not the registry was spelled out.
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{}{}", OFFICIAL_REPO_PREFIX, repository)
        } else {
            repository.to_string()
        };

        Ok((registry.to_string(), repository))
    }

    /// Registry domain the reference resolves to.
    pub fn domain(&self) -> &str {
        &self.registry
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Repository in the short form the Docker CLI prints (`nginx`,
    /// `user/app`, `ghcr.io/org/app`).
    pub fn familiar_name(&self) -> String {
        if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix(OFFICIAL_REPO_PREFIX)
                .unwrap_or(&self.repository)
                .to_string()
        } else {
            self.name()
        }
    }

    /// Familiar name plus tag and digest (`nginx:latest`, `ghcr.io/org/app:v1`).
    pub fn familiar_string(&self) -> String {
        let mut s = self.familiar_name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Same reference pinned to `digest`.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            digest: Some(digest.to_string()),
            ..self.clone()
        }
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

/// Whether the raw reference carries its own tag, before any default is
/// applied. A colon before the last `/` is a registry port, not a tag.
pub fn has_explicit_tag(reference: &str) -> bool {
    let reference = reference.trim();
    let name_tag = match reference.rfind('@') {
        Some(at_pos) => &reference[..at_pos],
        None => reference,
    };
    let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    name_tag[last_slash..].contains(':')
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

fn validate_digest(reference: &str, digest: &str) -> Result<()> {
    let valid = match digest.split_once(':') {
        Some((algorithm, hex)) => {
            !algorithm.is_empty()
                && algorithm
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AgentError::InvalidReference(format!(
            "invalid digest in {:?}: expected algorithm:hex",
            reference
        )))
    }
}

fn validate_tag(reference: &str, tag: &str) -> Result<()> {
    let mut chars = tag.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphanumeric() || first == '_')
                && tag.len() <= MAX_TAG_LEN
                && chars.all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c))
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AgentError::InvalidReference(format!(
            "invalid tag in {:?}",
            reference
        )))
    }
}

/// Path components are lowercase alphanumerics joined by `.`, `_`, `__` or `-`.
fn validate_repository(reference: &str, repository: &str) -> Result<()> {
    let component_ok = |component: &str| {
        let bytes = component.as_bytes();
        !bytes.is_empty()
            && bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && component
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
    };
    if repository.split('/').all(component_ok) {
        Ok(())
    } else {
        Err(AgentError::InvalidReference(format!(
            "invalid repository name in {:?}",
            reference
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_user_repo_defaults_tag() {
        let r = ImageReference::parse("repo/image").unwrap();
        let explicit = ImageReference::parse("repo/image:latest").unwrap();
        assert_eq!(r, explicit);
        assert_eq!(r.full_reference(), "docker.io/repo/image:latest");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("registry.local:5000/team/notebook:v1").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "team/notebook");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_registry_port_without_tag() {
        let r = ImageReference::parse("registry.local:5000/notebook").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "notebook");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse("ghcr.io/org/app@sha256:abcdef0123456789").unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, Some("sha256:abcdef0123456789".to_string()));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("ghcr.io/org/app:v1@sha256:abcdef").unwrap();
        assert_eq!(r.tag, Some("v1".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageReference::parse("localhost/myimage:test").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "myimage");
    }

    #[test]
    fn test_invalid_references() {
        for bad in [
            "",
            "   ",
            "Nginx",
            "nginx@invaliddigest",
            "nginx@sha256:xyz",
            "nginx:-bad",
            "ghcr.io/",
            "team//image",
            "ipfs://bafy",
        ] {
            let result = ImageReference::parse(bad);
            assert!(
                matches!(result, Err(AgentError::InvalidReference(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_familiar_string() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.familiar_string(), "nginx:latest");

        let r = ImageReference::parse("docker.io/user/app:v2").unwrap();
        assert_eq!(r.familiar_string(), "user/app:v2");

        let r = ImageReference::parse("ghcr.io/org/app:v1").unwrap();
        assert_eq!(r.familiar_string(), "ghcr.io/org/app:v1");
    }

    #[test]
    fn test_with_digest() {
        let r = ImageReference::parse("ghcr.io/org/app:v1").unwrap();
        let pinned = r.with_digest("sha256:0123abcd");
        assert_eq!(pinned.to_string(), "ghcr.io/org/app:v1@sha256:0123abcd");
        assert_eq!(pinned.domain(), "ghcr.io");
    }

    #[test]
    fn test_explicit_docker_hub_single_component() {
        let explicit = ImageReference::parse("docker.io/nginx:v1").unwrap();
        let short = ImageReference::parse("nginx:v1").unwrap();
        assert_eq!(explicit, short);
        assert_eq!(explicit.repository, "library/nginx");
        assert_eq!(explicit.full_reference(), "docker.io/library/nginx:v1");
        assert_eq!(explicit.familiar_name(), "nginx");

        let legacy = ImageReference::parse("index.docker.io/nginx:v1").unwrap();
        assert_eq!(legacy, short);

        let user = ImageReference::parse("docker.io/user/app").unwrap();
        assert_eq!(user.repository, "user/app");

        let other = ImageReference::parse("ghcr.io/app:v1").unwrap();
        assert_eq!(other.repository, "app");
    }

    #[test]
    fn test_has_explicit_tag() {
        assert!(has_explicit_tag("nginx:latest"));
        assert!(has_explicit_tag("registry.local:5000/team/app:v1"));
        assert!(has_explicit_tag("ghcr.io/org/app:v1@sha256:abcdef"));
        assert!(!has_explicit_tag("nginx"));
        assert!(!has_explicit_tag("registry.local:5000/team/app"));
        assert!(!has_explicit_tag("ghcr.io/org/app@sha256:abcdef"));
        assert!(!has_explicit_tag("myrepo/latest"));
    }

    #[test]
    fn test_display() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(format!("{}", r), "docker.io/library/nginx:1.25");
    }
}
