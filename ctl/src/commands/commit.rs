//! `commit-ctl commit` command: commit the calling container.

use clap::Args;
use commit_agent::image_api::CommitRequest;
use commit_agent::socket::SocketAddress;

use crate::cgroup::{container_id, CGROUP_PATH};

#[derive(Args)]
pub struct CommitArgs {
    /// Image reference to create (NAME[:TAG])
    pub image: String,
}

pub async fn execute(
    args: CommitArgs,
    address: SocketAddress,
) -> Result<(), Box<dyn std::error::Error>> {
    let container_id = container_id(CGROUP_PATH).map_err(|e| {
        tracing::error!(error = %e, "get container information failed");
        e
    })?;
    tracing::info!(container = %container_id, "container id");

    let mut client = super::agent_client(address).await?;
    let response = client
        .commit_image(CommitRequest {
            container_id,
            image: args.image,
        })
        .await
        .map_err(|status| status.message().to_string())?
        .into_inner();

    println!("{}", response.result);
    Ok(())
}
