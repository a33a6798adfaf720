//! Kubernetes integration module.
//!
//! Everything the engines need from the API server goes through [`ClusterApi`],
//! implemented against a live cluster by [`KubeCluster`].

mod kube_client;
mod kube_cluster;

use core::error::Error;

use api_types::RmdNodeState;
use api_types::RmdNodeStateStatus;
use api_types::RmdWorkload;
use api_types::RmdWorkloadStatus;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;

pub use kube_client::init_kube_client;
pub use kube_cluster::KubeCluster;

use crate::consts::daemon_pod_name;

pub type ClusterResult<T> = Result<T, Report<ClusterError>>;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ClusterError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Kubernetes API call failed: {message}")]
    Api { message: String },
    #[display("Daemon pod {pod_name} not found in namespace {namespace}")]
    DaemonPodNotFound { pod_name: String, namespace: String },
    #[display("Pod {pod_name} has no assigned address")]
    NoPodAddress { pod_name: String },
    #[display("Pod {pod_name} has no container")]
    NoContainer { pod_name: String },
    #[display("Pod {pod_name} declares no container port")]
    NoContainerPort { pod_name: String },
    #[display("Node {node} not found")]
    NodeNotFound { node: String },
    #[display("Node {node} reports no usable CPU capacity")]
    NoCpuCapacity { node: String },
}

impl Error for ClusterError {}

/// Cluster operations used by the reconciliation engines.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Every node state, across all namespaces
    async fn list_node_states(&self) -> ClusterResult<Vec<RmdNodeState>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>>;

    async fn get_node(&self, name: &str) -> ClusterResult<Option<Node>>;

    /// Deletes a pod; a pod that is already gone is not an error.
    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Replaces the whole status of a workload.
    async fn replace_workload_status(
        &self,
        workload: &RmdWorkload,
        status: RmdWorkloadStatus,
    ) -> ClusterResult<()>;

    /// Replaces the whole status of a node state.
    async fn replace_node_state_status(
        &self,
        node_state: &RmdNodeState,
        status: RmdNodeStateStatus,
    ) -> ClusterResult<()>;

    /// Creates or updates a workload.
    async fn apply_workload(&self, workload: &RmdWorkload) -> ClusterResult<()>;

    /// Looks a pod up by name in every namespace except the system ones.
    async fn find_pod_outside_system_namespaces(&self, name: &str) -> ClusterResult<Option<Pod>>;

    /// Creates the node state for `node` in `namespace` unless it exists.
    async fn ensure_node_state(&self, namespace: &str, node: &Node) -> ClusterResult<()>;
}

/// `host:port` of a daemon pod: its IP and first declared container port.
///
/// # Errors
///
/// - [`ClusterError::NoPodAddress`] if the pod has no IP yet
/// - [`ClusterError::NoContainer`] if the pod spec has no container
/// - [`ClusterError::NoContainerPort`] if the first container declares no port
pub fn daemon_host_port(pod: &Pod) -> ClusterResult<String> {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();

    let ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| {
            Report::new(ClusterError::NoPodAddress {
                pod_name: pod_name.clone(),
            })
        })?;

    let container = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .ok_or_else(|| {
            Report::new(ClusterError::NoContainer {
                pod_name: pod_name.clone(),
            })
        })?;

    let port = container
        .ports
        .as_ref()
        .and_then(|ports| ports.first())
        .map(|port| port.container_port)
        .ok_or_else(|| Report::new(ClusterError::NoContainerPort { pod_name }))?;

    Ok(format!("{ip}:{port}"))
}

/// Resolves `host:port` of the daemon serving `node`, looking the daemon pod
/// up in `namespace` (the namespace of that node's node state).
pub async fn resolve_daemon_host_port(
    cluster: &dyn ClusterApi,
    node: &str,
    namespace: &str,
) -> ClusterResult<String> {
    let pod_name = daemon_pod_name(node);
    let pod = cluster
        .get_pod(namespace, &pod_name)
        .await?
        .ok_or_else(|| {
            Report::new(ClusterError::DaemonPodNotFound {
                pod_name: pod_name.clone(),
                namespace: namespace.to_string(),
            })
        })?;
    daemon_host_port(&pod)
}

/// Number of logical CPUs a node reports in `status.capacity.cpu`.
pub fn node_cpu_count(node: &Node) -> Option<usize> {
    node.status
        .as_ref()?
        .capacity
        .as_ref()?
        .get("cpu")
        .and_then(|quantity| quantity.0.trim().parse::<usize>().ok())
}
