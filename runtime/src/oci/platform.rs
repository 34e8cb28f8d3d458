//! Platform selection for multi-arch image indexes.

use commit_agent_core::error::{AgentError, Result};
use serde::{Deserialize, Serialize};

/// An `os/arch[/variant]` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSpec {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl PlatformSpec {
    /// The platform the agent runs on. Images always target linux.
    pub fn host() -> Self {
        let (architecture, variant) = normalize_arch(std::env::consts::ARCH, None);
        Self {
            os: "linux".to_string(),
            architecture,
            variant,
        }
    }

    /// Parse `linux/arm64/v8`, `linux/amd64` or a bare `arm64` (os defaults to linux).
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(AgentError::Platform(format!("invalid platform {:?}", spec)));
        }
        let (os, arch, variant) = match parts.as_slice() {
            [arch] if !is_os(arch) => ("linux", *arch, None),
            [os] => (*os, std::env::consts::ARCH, None),
            [os, arch] => (*os, *arch, None),
            [os, arch, variant] => (*os, *arch, Some(*variant)),
            _ => {
                return Err(AgentError::Platform(format!(
                    "invalid platform {:?}: expected os[/arch[/variant]]",
                    spec
                )))
            }
        };
        let (architecture, variant) = normalize_arch(arch, variant);
        Ok(Self {
            os: os.to_lowercase(),
            architecture,
            variant,
        })
    }

    /// Whether an image platform satisfies this spec. A spec without a
    /// variant accepts any variant.
    pub fn matches(&self, platform: &ImagePlatform) -> bool {
        let (architecture, variant) =
            normalize_arch(&platform.architecture, platform.variant.as_deref());
        platform.os.eq_ignore_ascii_case(&self.os)
            && architecture == self.architecture
            && match (&self.variant, &variant) {
                (None, _) => true,
                (Some(want), Some(have)) => want == have,
                (Some(_), None) => false,
            }
    }
}

impl std::fmt::Display for PlatformSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Platform fields as they appear in index entries and image configs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePlatform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Which platforms of a local image take part in a push or commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformMatcher {
    /// Every platform present in the index
    All,
    /// Only the listed platforms
    Only(Vec<PlatformSpec>),
}

impl PlatformMatcher {
    /// Build a matcher from the push options. No explicit platforms means
    /// the host platform only.
    pub fn new(all_platforms: bool, platforms: &[String]) -> Result<Self> {
        if all_platforms {
            return Ok(PlatformMatcher::All);
        }
        if platforms.is_empty() {
            return Ok(PlatformMatcher::Only(vec![PlatformSpec::host()]));
        }
        let specs = platforms
            .iter()
            .map(|p| PlatformSpec::parse(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(PlatformMatcher::Only(specs))
    }

    /// Host platform only.
    pub fn host() -> Self {
        PlatformMatcher::Only(vec![PlatformSpec::host()])
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PlatformMatcher::All)
    }

    /// Entries without platform information only match `All`.
    pub fn matches(&self, platform: Option<&ImagePlatform>) -> bool {
        match (self, platform) {
            (PlatformMatcher::All, _) => true,
            (PlatformMatcher::Only(_), None) => false,
            (PlatformMatcher::Only(specs), Some(p)) => specs.iter().any(|s| s.matches(p)),
        }
    }
}

impl std::fmt::Display for PlatformMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformMatcher::All => write!(f, "all"),
            PlatformMatcher::Only(specs) => {
                let names: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

fn is_os(s: &str) -> bool {
    matches!(
        s.to_lowercase().as_str(),
        "linux" | "windows" | "darwin" | "freebsd" | "netbsd" | "openbsd" | "solaris" | "illumos"
    )
}

/// Map Rust/uname architecture names to their OCI spellings.
fn normalize_arch(arch: &str, variant: Option<&str>) -> (String, Option<String>) {
    let arch = arch.to_lowercase();
    let variant = variant.map(|v| v.to_lowercase());
    match arch.as_str() {
        "x86_64" | "x86-64" | "amd64" => ("amd64".to_string(), variant),
        "i386" | "i686" | "x86" | "386" => ("386".to_string(), variant),
        "aarch64" | "arm64" => {
            // v8 is the only arm64 variant in practice; treat it as implied
            let variant = variant.filter(|v| v != "v8");
            ("arm64".to_string(), variant)
        }
        "armhf" | "armel" | "arm" => ("arm".to_string(), variant),
        other => (other.to_string(), variant),
    }
}
