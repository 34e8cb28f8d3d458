//! containerd gRPC services bound to one namespace.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use commit_agent_core::error::{AgentError, Result};
use containerd_client::services::v1::snapshots::{
    snapshots_client::SnapshotsClient, MountsRequest, RemoveSnapshotRequest, StatSnapshotRequest,
    ViewSnapshotRequest,
};
use containerd_client::services::v1::{
    containers_client::ContainersClient, content_client::ContentClient, diff_client::DiffClient,
    images_client::ImagesClient, leases_client::LeasesClient, CreateImageRequest,
    CreateRequest as CreateLeaseRequest, DeleteImageRequest, DeleteRequest as DeleteLeaseRequest,
    DiffRequest, GetImageRequest, Image, InfoRequest, ListContainersRequest, ReadContentRequest,
    UpdateImageRequest, WriteAction, WriteContentRequest,
};
use containerd_client::types::Descriptor as ProtoDescriptor;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tonic::{Code, Request, Status};

pub use containerd_client::types::Mount;

use super::content::{sha256_digest, Descriptor, ImageContentStore, ImageRecord, Lease};
use super::walker::ContainerSummary;

const RUNTIME: &str = "Containerd";
const NAMESPACE_HEADER: &str = "containerd-namespace";
const LEASE_HEADER: &str = "containerd-lease";

/// Label that lets containerd expire a lease the agent never released.
const LABEL_GC_EXPIRE: &str = "containerd.io/gc.expire";
const LEASE_TTL_HOURS: i64 = 24;

/// containerd API client for one namespace, optionally under a lease.
#[derive(Clone)]
pub struct ContainerdApi {
    channel: Channel,
    namespace: String,
    lease: Option<String>,
}

impl ContainerdApi {
    /// Dial the containerd socket.
    pub async fn connect(socket: &Path, namespace: &str) -> Result<Self> {
        let channel = containerd_client::connect(socket)
            .await
            .map_err(|e| AgentError::ClientInit {
                runtime: RUNTIME.to_string(),
                message: format!("{}: {}", socket.display(), e),
            })?;

        tracing::debug!(socket = %socket.display(), namespace, "Connected to containerd");
        Ok(Self {
            channel,
            namespace: namespace.to_string(),
            lease: None,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Same client with every request attached to `lease`.
    pub fn with_lease(&self, lease: &str) -> Self {
        Self {
            lease: Some(lease.to_string()),
            ..self.clone()
        }
    }

    fn request<T>(&self, message: T) -> Result<Request<T>> {
        let mut request = Request::new(message);
        let metadata = request.metadata_mut();
        metadata.insert(NAMESPACE_HEADER, metadata_value(&self.namespace)?);
        if let Some(ref lease) = self.lease {
            metadata.insert(LEASE_HEADER, metadata_value(lease)?);
        }
        Ok(request)
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let mut client = ContainersClient::new(self.channel.clone());
        let response = client
            .list(self.request(ListContainersRequest::default())?)
            .await
            .map_err(|s| status_error("list containers", s))?
            .into_inner();

        Ok(response
            .containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id,
                image: c.image,
                snapshotter: c.snapshotter,
                snapshot_key: c.snapshot_key,
                labels: c.labels,
            })
            .collect())
    }

    /// Parent of a snapshot; empty for a base snapshot.
    pub async fn snapshot_parent(&self, snapshotter: &str, key: &str) -> Result<String> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let response = client
            .stat(self.request(StatSnapshotRequest {
                snapshotter: snapshotter.to_string(),
                key: key.to_string(),
            })?)
            .await
            .map_err(|s| status_error("stat snapshot", s))?
            .into_inner();

        Ok(response.info.map(|info| info.parent).unwrap_or_default())
    }

    pub async fn snapshot_mounts(&self, snapshotter: &str, key: &str) -> Result<Vec<Mount>> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let response = client
            .mounts(self.request(MountsRequest {
                snapshotter: snapshotter.to_string(),
                key: key.to_string(),
            })?)
            .await
            .map_err(|s| status_error("snapshot mounts", s))?
            .into_inner();
        Ok(response.mounts)
    }

    /// Read-only view of `parent` under `key`.
    pub async fn view_snapshot(
        &self,
        snapshotter: &str,
        key: &str,
        parent: &str,
    ) -> Result<Vec<Mount>> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let response = client
            .view(self.request(ViewSnapshotRequest {
                snapshotter: snapshotter.to_string(),
                key: key.to_string(),
                parent: parent.to_string(),
                ..Default::default()
            })?)
            .await
            .map_err(|s| status_error("view snapshot", s))?
            .into_inner();
        Ok(response.mounts)
    }

    pub async fn remove_snapshot(&self, snapshotter: &str, key: &str) -> Result<()> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        client
            .remove(self.request(RemoveSnapshotRequest {
                snapshotter: snapshotter.to_string(),
                key: key.to_string(),
            })?)
            .await
            .map_err(|s| status_error("remove snapshot", s))?;
        Ok(())
    }

    /// Compute the layer between `lower` and `upper` and store it as a blob.
    pub async fn diff(
        &self,
        lower: Vec<Mount>,
        upper: Vec<Mount>,
        media_type: &str,
        reference: &str,
    ) -> Result<Descriptor> {
        let mut client = DiffClient::new(self.channel.clone());
        let response = client
            .diff(self.request(DiffRequest {
                left: lower,
                right: upper,
                media_type: media_type.to_string(),
                r#ref: reference.to_string(),
                ..Default::default()
            })?)
            .await
            .map_err(|s| status_error("diff", s))?
            .into_inner();

        response
            .diff
            .map(from_proto_descriptor)
            .ok_or_else(|| AgentError::runtime(RUNTIME, "diff returned no descriptor"))
    }

    /// Lease that expires on its own if never deleted.
    pub async fn create_lease(&self) -> Result<String> {
        let expire = chrono::Utc::now() + chrono::Duration::hours(LEASE_TTL_HOURS);
        let mut labels = HashMap::new();
        labels.insert(LABEL_GC_EXPIRE.to_string(), expire.to_rfc3339());

        let mut client = LeasesClient::new(self.channel.clone());
        let response = client
            .create(self.request(CreateLeaseRequest {
                id: format!("commit-agent-{}", uuid::Uuid::new_v4()),
                labels,
            })?)
            .await
            .map_err(|s| status_error("create lease", s))?
            .into_inner();

        response
            .lease
            .map(|lease| lease.id)
            .ok_or_else(|| AgentError::runtime(RUNTIME, "create lease returned no lease"))
    }

    pub async fn delete_lease(&self, id: &str) -> Result<()> {
        let mut client = LeasesClient::new(self.channel.clone());
        client
            .delete(self.request(DeleteLeaseRequest {
                id: id.to_string(),
                sync: false,
            })?)
            .await
            .map_err(|s| status_error("delete lease", s))?;
        Ok(())
    }
}

#[async_trait]
impl ImageContentStore for ContainerdApi {
    async fn get_image(&self, name: &str) -> Result<ImageRecord> {
        let mut client = ImagesClient::new(self.channel.clone());
        let response = client
            .get(self.request(GetImageRequest {
                name: name.to_string(),
            })?)
            .await
            .map_err(|s| match s.code() {
                Code::NotFound => AgentError::runtime(RUNTIME, format!("image {:?}: not found", name)),
                _ => status_error("get image", s),
            })?
            .into_inner();

        response
            .image
            .and_then(from_proto_image)
            .ok_or_else(|| AgentError::runtime(RUNTIME, format!("image {:?}: not found", name)))
    }

    async fn create_image(&self, image: ImageRecord) -> Result<ImageRecord> {
        let proto = to_proto_image(&image);
        let mut client = ImagesClient::new(self.channel.clone());

        let created = client
            .create(self.request(CreateImageRequest {
                image: Some(proto.clone()),
                ..Default::default()
            })?)
            .await;

        let response_image = match created {
            Ok(response) => response.into_inner().image,
            Err(status) if status.code() == Code::AlreadyExists => {
                tracing::debug!(image = %image.name, "Image exists, updating");
                client
                    .update(self.request(UpdateImageRequest {
                        image: Some(proto),
                        ..Default::default()
                    })?)
                    .await
                    .map_err(|s| status_error("update image", s))?
                    .into_inner()
                    .image
            }
            Err(status) => return Err(status_error("create image", status)),
        };

        Ok(response_image.and_then(from_proto_image).unwrap_or(image))
    }

    async fn delete_image(&self, name: &str) -> Result<()> {
        let mut client = ImagesClient::new(self.channel.clone());
        client
            .delete(self.request(DeleteImageRequest {
                name: name.to_string(),
                sync: true,
            })?)
            .await
            .map_err(|s| status_error("delete image", s))?;
        Ok(())
    }

    async fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let mut client = ContentClient::new(self.channel.clone());
        let mut stream = client
            .read(self.request(ReadContentRequest {
                digest: digest.to_string(),
                offset: 0,
                size: 0,
            })?)
            .await
            .map_err(|s| status_error("read content", s))?
            .into_inner();

        let mut data = Vec::new();
        while let Some(chunk) = stream
            .message()
            .await
            .map_err(|s| status_error("read content", s))?
        {
            data.extend_from_slice(&chunk.data);
        }
        Ok(data)
    }

    async fn blob_labels(&self, digest: &str) -> Result<HashMap<String, String>> {
        let mut client = ContentClient::new(self.channel.clone());
        let response = client
            .info(self.request(InfoRequest {
                digest: digest.to_string(),
            })?)
            .await
            .map_err(|s| status_error("content info", s))?
            .into_inner();
        Ok(response.info.map(|info| info.labels).unwrap_or_default())
    }

    async fn write_blob(
        &self,
        media_type: &str,
        data: Vec<u8>,
        labels: HashMap<String, String>,
    ) -> Result<Descriptor> {
        let digest = sha256_digest(&data);
        let size = data.len() as i64;

        let message = WriteContentRequest {
            action: WriteAction::Commit as i32,
            r#ref: format!("commit-agent-{}", uuid::Uuid::new_v4()),
            total: size,
            expected: digest.clone(),
            offset: 0,
            data,
            labels,
        };
        let request = self.request(tokio_stream::iter(vec![message]))?;

        let mut client = ContentClient::new(self.channel.clone());
        match client.write(request).await {
            Ok(response) => {
                let mut stream = response.into_inner();
                loop {
                    match stream.message().await {
                        Ok(Some(_)) => continue,
                        Ok(None) => break,
                        Err(s) if s.code() == Code::AlreadyExists => break,
                        Err(s) => return Err(status_error("write content", s)),
                    }
                }
            }
            Err(s) if s.code() == Code::AlreadyExists => {}
            Err(s) => return Err(status_error("write content", s)),
        }

        tracing::debug!(digest = %digest, size, media_type, "Wrote content");
        Ok(Descriptor::new(media_type, digest, size))
    }

    async fn begin_lease(&self) -> Result<Lease> {
        let id = self.create_lease().await?;
        Ok(Lease {
            store: Arc::new(self.with_lease(&id)),
            id,
        })
    }

    async fn release_lease(&self, id: &str) -> Result<()> {
        self.delete_lease(id).await
    }
}

fn metadata_value(value: &str) -> Result<MetadataValue<Ascii>> {
    value
        .parse()
        .map_err(|_| AgentError::Config(format!("invalid gRPC metadata value {:?}", value)))
}

fn status_error(operation: &str, status: Status) -> AgentError {
    AgentError::runtime(RUNTIME, format!("{}: {}", operation, status.message()))
}

fn from_proto_descriptor(d: ProtoDescriptor) -> Descriptor {
    Descriptor::new(d.media_type, d.digest, d.size)
}

fn from_proto_image(image: Image) -> Option<ImageRecord> {
    let target = image.target.map(from_proto_descriptor)?;
    Some(ImageRecord {
        name: image.name,
        target,
        labels: image.labels,
    })
}

fn to_proto_image(image: &ImageRecord) -> Image {
    Image {
        name: image.name.clone(),
        labels: image.labels.clone(),
        target: Some(ProtoDescriptor {
            media_type: image.target.media_type.clone(),
            digest: image.target.digest.clone(),
            size: image.target.size,
            ..Default::default()
        }),
        ..Default::default()
    }
}
