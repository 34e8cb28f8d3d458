//! Client side of the image service over a Unix socket.

use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use crate::image_api::image_service_client::ImageServiceClient;
use crate::socket::SocketAddress;

/// Dial the agent. The endpoint URI is a placeholder; every connection goes
/// to `address`.
pub async fn connect(
    address: SocketAddress,
) -> Result<ImageServiceClient<Channel>, tonic::transport::Error> {
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(service_fn(move |_: Uri| {
            let address = address.clone();
            async move { address.connect().await }
        }))
        .await?;
    Ok(ImageServiceClient::new(channel))
}
