//! Container ID discovery from the calling process's cgroup.

use std::path::Path;

use commit_agent_core::error::{AgentError, Result};

/// cgroup membership of the current process.
pub const CGROUP_PATH: &str = "/proc/self/cgroup";

/// ID of the container this process runs in, read from a cgroup file.
pub fn container_id(path: impl AsRef<Path>) -> Result<String> {
    let content = std::fs::read_to_string(path.as_ref())?;
    container_id_from_cgroup(&content)
}

/// The `name=systemd` line (cgroup v1) or the unified `0::` line (cgroup v2).
fn container_line(content: &str) -> Option<&str> {
    content
        .lines()
        .find(|line| line.contains("name=systemd"))
        .or_else(|| content.lines().find(|line| line.starts_with("0::")))
}

/// `.../kubepods-pod1.slice/cri-containerd-abc123.scope` -> `abc123`.
fn id_from_line(line: &str) -> &str {
    let segment = line.rsplit('/').next().unwrap_or(line);
    let segment = segment.rsplit('-').next().unwrap_or(segment);
    segment.split('.').next().unwrap_or(segment)
}

pub fn container_id_from_cgroup(content: &str) -> Result<String> {
    let id = container_line(content)
        .map(id_from_line)
        .unwrap_or_default();
    if id.is_empty() {
        return Err(AgentError::Other("can't get container id".to_string()));
    }
    Ok(id.to_string())
}
