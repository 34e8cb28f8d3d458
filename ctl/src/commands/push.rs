//! `commit-ctl push` command.

use clap::Args;
use commit_agent::image_api::PushRequest;
use commit_agent::socket::SocketAddress;

#[derive(Args)]
pub struct PushArgs {
    /// Image reference to push (NAME[:TAG] or ipfs://NAME[:TAG])
    pub image: String,

    /// Registry username
    #[arg(long, default_value = "")]
    pub username: String,

    /// Registry password
    #[arg(long, default_value = "")]
    pub password: String,
}

pub async fn execute(
    args: PushArgs,
    address: SocketAddress,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = super::agent_client(address).await?;
    let response = client
        .push_image(PushRequest {
            image: args.image,
            username: args.username,
            password: args.password,
        })
        .await
        .map_err(|status| status.message().to_string())?
        .into_inner();

    println!("{}", response.result);
    Ok(())
}
