//! Container lookup by short ID or name.

use std::collections::HashMap;

use commit_agent_core::error::{AgentError, Result};

/// Label nerdctl stores the container name under.
pub const LABEL_NERDCTL_NAME: &str = "nerdctl/name";

/// The container fields commit needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub snapshotter: String,
    pub snapshot_key: String,
    pub labels: HashMap<String, String>,
}

/// Find the single container whose ID starts with `request` or whose
/// nerdctl name equals it.
pub fn find_container<'a>(
    containers: &'a [ContainerSummary],
    request: &str,
) -> Result<&'a ContainerSummary> {
    if request.is_empty() {
        return Err(AgentError::Other("got empty container ID".to_string()));
    }

    let matches: Vec<&ContainerSummary> = containers
        .iter()
        .filter(|c| {
            c.id.starts_with(request)
                || c.labels.get(LABEL_NERDCTL_NAME).map(String::as_str) == Some(request)
        })
        .collect();

    match matches.as_slice() {
        [] => Err(AgentError::ContainerNotFound(request.to_string())),
        [found] => Ok(found),
        _ => Err(AgentError::AmbiguousContainerId(request.to_string())),
    }
}
