//! commit-ctl - asks the node's commit agent to commit or push the calling
//! container.

pub mod cgroup;
pub mod commands;
