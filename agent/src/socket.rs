//! Unix socket addresses.
//!
//! `@name` selects a Linux abstract-namespace socket, which has no file on
//! disk. Anything else is a filesystem path.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

/// Where the agent listens and the control client dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    Path(PathBuf),
    Abstract(String),
}

impl SocketAddress {
    pub fn parse(address: &str) -> Self {
        match address.strip_prefix('@') {
            Some(name) => SocketAddress::Abstract(name.to_string()),
            None => SocketAddress::Path(PathBuf::from(address)),
        }
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, SocketAddress::Abstract(_))
    }

    /// Filesystem path, if the socket has one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SocketAddress::Path(path) => Some(path),
            SocketAddress::Abstract(_) => None,
        }
    }

    /// Create the socket's parent directory if it does not exist yet.
    /// Returns whether a directory was created.
    pub fn ensure_parent_dir(&self) -> io::Result<bool> {
        let parent = match self.path().and_then(Path::parent) {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => return Ok(false),
        };
        if parent.exists() {
            return Ok(false);
        }
        std::fs::create_dir_all(parent)?;
        Ok(true)
    }

    /// Unlink a socket file left behind by an earlier run.
    pub fn remove_stale(&self) -> io::Result<()> {
        if let Some(path) = self.path() {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed stale socket file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Bind a listener. Must run inside a tokio runtime.
    pub fn bind(&self) -> io::Result<UnixListener> {
        match self {
            SocketAddress::Path(path) => UnixListener::bind(path),
            SocketAddress::Abstract(name) => bind_abstract(name),
        }
    }

    pub async fn connect(&self) -> io::Result<UnixStream> {
        match self {
            SocketAddress::Path(path) => UnixStream::connect(path).await,
            SocketAddress::Abstract(name) => connect_abstract(name),
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Path(path) => write!(f, "{}", path.display()),
            SocketAddress::Abstract(name) => write!(f, "@{}", name),
        }
    }
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}

#[cfg(not(target_os = "linux"))]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    Err(abstract_unsupported(name))
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    Err(abstract_unsupported(name))
}

#[cfg(not(target_os = "linux"))]
fn abstract_unsupported(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("abstract socket @{} requires Linux", name),
    )
}
