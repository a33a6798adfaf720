//! Drives every targeted node's daemon towards one [`RmdWorkload`].
//!
//! A pass creates or updates the entry on each target node,
//! records the outcome per node and then sweeps the entry off every other
//! node. Deletion removes the entry everywhere. The daemon's entry list is
//! always re-read; identifiers cached in status are never trusted.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::external_id;
use api_types::CoreSelection;
use api_types::DaemonWorkload;
use api_types::RmdNodeState;
use api_types::RmdWorkload;
use api_types::RmdWorkloadStatus;
use api_types::WorkloadState;
use error_stack::Report;
use error_stack::ResultExt;
use kube::ResourceExt;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::consts::pod_name_from_workload;
use crate::daemon::daemon_base_url;
use crate::daemon::find_by_uuid;
use crate::daemon::DaemonApi;
use crate::daemon::DaemonError;
use crate::error::status_summary;
use crate::error::SyncError;
use crate::error::SyncResult;
use crate::k8s::node_cpu_count;
use crate::k8s::resolve_daemon_host_port;
use crate::k8s::ClusterApi;
use crate::k8s::ClusterError;
use crate::registry::NodeRegistry;

/// What happened to the entry on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Updated,
    /// The daemon refused the entry. `evict` is set when the workload was
    /// derived from a pod, which then has to go.
    Rejected { evict: bool },
}

/// A pod to delete because its partition request cannot be honored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub pod: String,
    pub namespace: String,
}

/// Result of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Status to persist on the workload
    pub status: RmdWorkloadStatus,
    /// Pods the caller must delete
    pub evictions: Vec<Eviction>,
    /// Nodes whose synchronization failed and must be retried
    pub failed_nodes: Vec<String>,
}

struct NodeResult {
    state: WorkloadState,
    outcome: CreateOutcome,
}

pub struct WorkloadSynchronizer {
    daemon: Arc<dyn DaemonApi>,
    cluster: Arc<dyn ClusterApi>,
    registry: Arc<NodeRegistry>,
}

impl WorkloadSynchronizer {
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

    /// Converges the daemons on the workload's spec.
    ///
    /// Per-node failures do not abort the pass; they are recorded in the
    /// returned status and listed in [`SyncReport::failed_nodes`].
    ///
    /// # Errors
    ///
    /// - [`SyncError::ListNodeStates`] if the node states cannot be listed
    #[instrument(skip_all, fields(workload = %workload.name_any()))]
    pub async fn sync(&self, workload: &RmdWorkload) -> SyncResult<SyncReport> {
        let name = workload.name_any();
        let namespace = workload.namespace().unwrap_or_default();
        let uuid = external_id(&name, &namespace);

        let node_states = self
            .cluster
            .list_node_states()
            .await
            .change_context(SyncError::ListNodeStates)?;
        let namespaces = node_namespaces(&node_states);
        let targets = workload.spec.target_nodes();

        let mut report = SyncReport {
            status: workload.status.clone().unwrap_or_default(),
            ..Default::default()
        };

        for node in &targets {
            if !self.registry.contains(node) {
                warn!(node, "Target node is not registered as daemon-eligible");
            }

            let result = match namespaces.get(*node) {
                Some(node_namespace) => {
                    self.sync_node(workload, &uuid, node, node_namespace).await
                }
                None => Err(Report::new(SyncError::NodeStateMissing {
                    node: node.to_string(),
                })),
            };

            match result {
                Ok(NodeResult { state, outcome }) => {
                    debug!(node, ?outcome, response = %state.response, "Node synchronized");
                    if outcome == (CreateOutcome::Rejected { evict: true }) {
                        if let Some(pod) = pod_name_from_workload(&name) {
                            report.evictions.push(Eviction {
                                pod: pod.to_string(),
                                namespace: namespace.clone(),
                            });
                        }
                    }
                    if matches!(outcome, CreateOutcome::Rejected { .. }) {
                        report.failed_nodes.push(node.to_string());
                    }
                    report.status.workload_states.insert(node.to_string(), state);
                }
                Err(error) => {
                    warn!(node, "Failed to synchronize workload: {error:?}");
                    report
                        .status
                        .workload_states
                        .entry(node.to_string())
                        .or_default()
                        .response = status_summary(&error);
                    report.failed_nodes.push(node.to_string());
                }
            }
        }

        // Nodes neither targeted nor backed by a node state can never be swept.
        report
            .status
            .workload_states
            .retain(|node, _| targets.contains(node.as_str()) || namespaces.contains_key(node));

        self.sweep_orphans(&uuid, &targets, &node_states, &mut report)
            .await;

        Ok(report)
    }

    /// Removes the workload's entry from every node that has a node state.
    ///
    /// A node without the entry is already converged.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ListNodeStates`] if the node states cannot be listed
    /// - [`SyncError::NodesFailed`] naming every node whose cleanup failed
    #[instrument(skip_all, fields(workload = %workload.name_any()))]
    pub async fn remove(&self, workload: &RmdWorkload) -> SyncResult<()> {
        let name = workload.name_any();
        let uuid = external_id(&name, &workload.namespace().unwrap_or_default());

        let node_states = self
            .cluster
            .list_node_states()
            .await
            .change_context(SyncError::ListNodeStates)?;

        let mut failed = Vec::new();
        for node_state in &node_states {
            let node = node_state.spec.node.as_str();
            let node_namespace = node_state.namespace().unwrap_or_default();
            match self.remove_from_node(&uuid, node, &node_namespace).await {
                Ok(true) => info!(node, "Removed workload from daemon"),
                Ok(false) => debug!(node, "Workload not present on daemon"),
                Err(error) => {
                    warn!(node, "Failed to remove workload: {error:?}");
                    failed.push(node.to_string());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Report::new(SyncError::nodes_failed(&failed)))
        }
    }

    async fn sync_node(
        &self,
        workload: &RmdWorkload,
        uuid: &str,
        node: &str,
        node_namespace: &str,
    ) -> SyncResult<NodeResult> {
        let address = self.daemon_address(node, node_namespace).await?;
        let core_ids = self.resolve_cores(workload, node).await?;
        let body = DaemonWorkload::from_spec(uuid.to_string(), core_ids, &workload.spec);
        let daemon_error = || SyncError::Daemon {
            node: node.to_string(),
        };

        let entries = self
            .daemon
            .get_workloads(&address)
            .await
            .change_context_lazy(daemon_error)?;

        if let Some(existing) = find_by_uuid(&entries, uuid) {
            let response = self
                .daemon
                .update_workload(&address, &existing.id, &body)
                .await
                .change_context_lazy(daemon_error)?;
            return Ok(NodeResult {
                state: WorkloadState {
                    response,
                    id: existing.id.clone(),
                    cos_name: existing.cos_name.clone(),
                    status: existing.status.clone(),
                },
                outcome: CreateOutcome::Updated,
            });
        }

        let evict = pod_name_from_workload(&workload.name_any()).is_some();
        let response = match self.daemon.create_workload(&address, &body).await {
            Ok(response) => response,
            Err(error) if matches!(error.current_context(), DaemonError::Rejected { .. }) => {
                warn!(node, "Daemon rejected workload: {}", error.current_context());
                return Ok(NodeResult {
                    state: WorkloadState {
                        response: error.current_context().to_string(),
                        ..Default::default()
                    },
                    outcome: CreateOutcome::Rejected { evict },
                });
            }
            Err(error) => return Err(error.change_context(daemon_error())),
        };

        let entries = self
            .daemon
            .get_workloads(&address)
            .await
            .change_context_lazy(daemon_error)?;
        match find_by_uuid(&entries, uuid) {
            Some(created) => Ok(NodeResult {
                state: WorkloadState {
                    response,
                    id: created.id.clone(),
                    cos_name: created.cos_name.clone(),
                    status: created.status.clone(),
                },
                outcome: CreateOutcome::Created,
            }),
            None => {
                warn!(node, "Daemon accepted workload but does not list it");
                Ok(NodeResult {
                    state: WorkloadState {
                        response,
                        ..Default::default()
                    },
                    outcome: CreateOutcome::Rejected { evict },
                })
            }
        }
    }

    /// Deletes the entry from nodes no longer targeted and drops their status.
    async fn sweep_orphans(
        &self,
        uuid: &str,
        targets: &BTreeSet<&str>,
        node_states: &[RmdNodeState],
        report: &mut SyncReport,
    ) {
        for node_state in node_states {
            let node = node_state.spec.node.as_str();
            if targets.contains(node) {
                continue;
            }
            let node_namespace = node_state.namespace().unwrap_or_default();
            match self.remove_from_node(uuid, node, &node_namespace).await {
                Ok(removed) => {
                    if removed {
                        info!(node, "Removed workload from node no longer targeted");
                    }
                    report.status.workload_states.remove(node);
                }
                Err(error) => {
                    warn!(node, "Failed to sweep workload: {error:?}");
                    report.failed_nodes.push(node.to_string());
                }
            }
        }
    }

    /// Returns whether an entry was found and deleted.
    async fn remove_from_node(&self, uuid: &str, node: &str, node_namespace: &str) -> SyncResult<bool> {
        let address = self.daemon_address(node, node_namespace).await?;
        let daemon_error = || SyncError::Daemon {
            node: node.to_string(),
        };

        let entries = self
            .daemon
            .get_workloads(&address)
            .await
            .change_context_lazy(daemon_error)?;
        let Some(existing) = find_by_uuid(&entries, uuid) else {
            return Ok(false);
        };
        self.daemon
            .delete_workload(&address, &existing.id)
            .await
            .change_context_lazy(daemon_error)?;
        Ok(true)
    }

    async fn daemon_address(&self, node: &str, node_namespace: &str) -> SyncResult<String> {
        let host_port = resolve_daemon_host_port(self.cluster.as_ref(), node, node_namespace)
            .await
            .change_context_lazy(|| SyncError::DaemonAddress {
                node: node.to_string(),
            })?;
        Ok(daemon_base_url(self.daemon.as_ref(), &host_port))
    }

    async fn resolve_cores(&self, workload: &RmdWorkload, node: &str) -> SyncResult<Vec<String>> {
        let selection = workload.spec.core_selection();
        if let CoreSelection::Explicit(cores) = selection {
            return Ok(cores);
        }

        let cores_error = || SyncError::NodeCores {
            node: node.to_string(),
        };
        let cluster_node = self
            .cluster
            .get_node(node)
            .await
            .change_context_lazy(cores_error)?
            .ok_or_else(|| {
                Report::new(ClusterError::NodeNotFound {
                    node: node.to_string(),
                })
                .change_context(cores_error())
            })?;
        let cpu_count = node_cpu_count(&cluster_node).ok_or_else(|| {
            Report::new(ClusterError::NoCpuCapacity {
                node: node.to_string(),
            })
            .change_context(cores_error())
        })?;
        Ok(selection.resolve(cpu_count))
    }
}

fn node_namespaces(node_states: &[RmdNodeState]) -> BTreeMap<String, String> {
    node_states
        .iter()
        .map(|ns| (ns.spec.node.clone(), ns.namespace().unwrap_or_default()))
        .collect()
}
