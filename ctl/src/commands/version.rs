//! `commit-ctl version` command.

use clap::Args;
use commit_agent::image_api::VersionRequest;
use commit_agent::socket::SocketAddress;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(
    _args: VersionArgs,
    address: SocketAddress,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = super::agent_client(address).await?;
    let response = client.version(VersionRequest {}).await?.into_inner();
    println!("{}", response.version);
    Ok(())
}
