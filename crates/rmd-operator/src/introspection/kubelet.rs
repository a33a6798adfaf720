use std::path::PathBuf;

use async_trait::async_trait;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;
use tracing::debug;

use super::IntrospectionError;
use super::IntrospectionResult;
use super::PodResourcesSource;

const LIST_PATH: &str = "/v1.PodResourcesLister/List";

// Subset of the kubelet pod-resources v1 API; unknown fields are skipped on decode.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPodResourcesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPodResourcesResponse {
    #[prost(message, repeated, tag = "1")]
    pub pod_resources: Vec<PodResources>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PodResources {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(message, repeated, tag = "3")]
    pub containers: Vec<ContainerResources>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerResources {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, repeated, tag = "3")]
    pub cpu_ids: Vec<i64>,
}

/// Kubelet pod-resources `List` over its local unix socket.
#[derive(Debug, Clone)]
pub struct KubeletPodResources {
    socket_path: PathBuf,
}

impl KubeletPodResources {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn connect(&self) -> IntrospectionResult<Channel> {
        let socket_path = self.socket_path.clone();
        let connect_error = || IntrospectionError::Connect {
            path: self.socket_path.display().to_string(),
        };

        // The URI is a placeholder; every connection goes to the socket.
        Endpoint::from_static("http://[::]:50051")
            .connect_with_connector(service_fn(move |_: Uri| {
                let socket_path = socket_path.clone();
                async move {
                    tokio::net::UnixStream::connect(socket_path)
                        .await
                        .map(TokioIo::new)
                }
            }))
            .await
            .change_context_lazy(connect_error)
    }
}

#[async_trait]
impl PodResourcesSource for KubeletPodResources {
    async fn list(&self) -> IntrospectionResult<Vec<PodResources>> {
        let channel = self.connect().await?;
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.change_context(IntrospectionError::List)?;

        let codec: ProstCodec<ListPodResourcesRequest, ListPodResourcesResponse> =
            ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(ListPodResourcesRequest {}),
                PathAndQuery::from_static(LIST_PATH),
                codec,
            )
            .await
            .change_context(IntrospectionError::List)?;

        let pods = response.into_inner().pod_resources;
        debug!(pods = pods.len(), "Listed pod resources from kubelet");
        Ok(pods)
    }
}
