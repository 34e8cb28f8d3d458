//! OCI image references, platforms and registry push.

pub mod platform;
pub mod reference;
pub mod registry;

pub use platform::{ImagePlatform, PlatformMatcher, PlatformSpec};
pub use reference::ImageReference;
pub use registry::{
    Blob, BlobSource, CredentialResolver, OciRegistryTransport, PushContent, RegistryAuth,
    RegistryTransport, TransportMode,
};
