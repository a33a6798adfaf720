use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::RmdNodeState;
use api_types::RmdNodeStateStatus;
use error_stack::ResultExt;
use kube::ResourceExt;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::daemon::daemon_base_url;
use crate::daemon::DaemonApi;
use crate::error::SyncError;
use crate::error::SyncResult;
use crate::k8s::resolve_daemon_host_port;
use crate::k8s::ClusterApi;
use crate::registry::NodeRegistry;

/// Mirrors a node's live daemon entries into its [`RmdNodeState`] status.
pub struct NodeStateReporter {
    daemon: Arc<dyn DaemonApi>,
    cluster: Arc<dyn ClusterApi>,
    registry: Arc<NodeRegistry>,
}

impl NodeStateReporter {
    pub fn new(
        daemon: Arc<dyn DaemonApi>,
        cluster: Arc<dyn ClusterApi>,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            daemon,
            cluster,
            registry,
        }
    }

    /// Polls the node's daemon and replaces the status wholesale.
    ///
    /// An unreachable daemon yields an empty entry map rather than an error,
    /// so the next poll still happens.
    ///
    /// # Errors
    ///
    /// - [`SyncError::DaemonAddress`] if the daemon pod cannot be resolved
    /// - [`SyncError::Status`] if the status cannot be written
    #[instrument(skip_all, fields(node = %node_state.spec.node))]
    pub async fn poll(&self, node_state: &RmdNodeState) -> SyncResult<RmdNodeStateStatus> {
        let node = node_state.spec.node.as_str();
        if self.registry.add(node) {
            info!(node, "Registered daemon node");
        }

        let namespace = node_state.namespace().unwrap_or_default();
        let host_port = resolve_daemon_host_port(self.cluster.as_ref(), node, &namespace)
            .await
            .change_context_lazy(|| SyncError::DaemonAddress {
                node: node.to_string(),
            })?;
        let address = daemon_base_url(self.daemon.as_ref(), &host_port);

        let entries = match self.daemon.get_workloads(&address).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%address, "Failed to fetch daemon workloads: {error:?}");
                Vec::new()
            }
        };
        let workloads: BTreeMap<_, _> = entries
            .iter()
            .map(|entry| (entry.id.clone(), entry.snapshot()))
            .collect();

        let available_cache_ways = match self.daemon.get_l3_cache(&address).await {
            Ok(cache) => cache
                .available_ways_total()
                .inspect_err(|error| warn!(%address, "Invalid available ways: {error}"))
                .ok(),
            Err(error) => {
                debug!(%address, "Failed to fetch L3 cache info: {error:?}");
                None
            }
        };

        let status = RmdNodeStateStatus {
            workloads,
            available_cache_ways,
        };
        self.cluster
            .replace_node_state_status(node_state, status.clone())
            .await
            .change_context_lazy(|| SyncError::Status {
                name: node_state.name_any(),
            })?;
        debug!(entries = status.workloads.len(), "Node state updated");
        Ok(status)
    }

    /// Drops the node from the registry once its node state is gone.
    pub fn forget(&self, node_state: &RmdNodeState) {
        let node = node_state.spec.node.as_str();
        if self.registry.remove(node) {
            info!(node, "Unregistered daemon node");
        }
    }
}
