use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::retry_after;
use crate::deriver::WorkloadDeriver;
use crate::error::ReconcileError;
use crate::error::SyncError;
use crate::error::SyncResult;
use crate::introspection::PodResourcesSource;
use crate::k8s::ClusterApi;

pub struct PodContext<S> {
    pub client: Client,
    pub cluster: Arc<dyn ClusterApi>,
    pub deriver: WorkloadDeriver<S>,
    /// This agent's own pod, whose host IP identifies the local node
    pub agent_pod: String,
    pub requeue: Duration,
}

/// Runs until shutdown, deriving workloads from every pod event.
pub async fn run<S>(ctx: Arc<PodContext<S>>)
where
    S: PodResourcesSource + 'static,
{
    let api: Api<Pod> = Api::all(ctx.client.clone());
    info!(agent_pod = %ctx.agent_pod, "Starting pod controller");
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<S>, error_policy::<S>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(pod = %object.name, "Pod processed"),
                Err(e) => warn!("Pod processing failed: {e}"),
            }
        })
        .await;
}

async fn reconcile<S>(pod: Arc<Pod>, ctx: Arc<PodContext<S>>) -> Result<Action, ReconcileError>
where
    S: PodResourcesSource,
{
    if pod.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    derive_and_apply(&pod, &ctx.deriver, ctx.cluster.as_ref(), &ctx.agent_pod).await?;
    Ok(Action::await_change())
}

fn error_policy<S>(pod: Arc<Pod>, error: &ReconcileError, ctx: Arc<PodContext<S>>) -> Action {
    retry_after(pod.as_ref(), error, ctx.requeue)
}

/// Derives the workloads of `pod` and creates or updates each of them.
/// Returns how many were applied.
pub async fn derive_and_apply<S: PodResourcesSource>(
    pod: &Pod,
    deriver: &WorkloadDeriver<S>,
    cluster: &dyn ClusterApi,
    agent_pod: &str,
) -> SyncResult<usize> {
    let host_ip = agent_host_ip(cluster, agent_pod).await?;
    let workloads = deriver
        .derive(pod, &host_ip)
        .await
        .change_context_lazy(|| SyncError::Derive {
            pod: pod.name_any(),
        })?;

    for workload in &workloads {
        cluster
            .apply_workload(workload)
            .await
            .change_context_lazy(|| SyncError::Apply {
                name: workload.name_any(),
            })?;
        info!(workload = %workload.name_any(), "Applied derived workload");
    }
    Ok(workloads.len())
}

/// Host IP of the node the agent pod runs on.
async fn agent_host_ip(cluster: &dyn ClusterApi, agent_pod: &str) -> SyncResult<String> {
    let agent_error = || SyncError::AgentHost {
        pod: agent_pod.to_string(),
    };
    cluster
        .find_pod_outside_system_namespaces(agent_pod)
        .await
        .change_context_lazy(agent_error)?
        .and_then(|pod| pod.status?.host_ip)
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| Report::new(agent_error()))
}
