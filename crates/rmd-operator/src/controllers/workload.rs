use std::sync::Arc;
use std::time::Duration;

use api_types::RmdWorkload;
use error_stack::Report;
use error_stack::ResultExt;
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::finalizer;
use kube::runtime::finalizer::Event;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::retry_after;
use crate::consts::WORKLOAD_FINALIZER;
use crate::error::ReconcileError;
use crate::error::SyncError;
use crate::error::SyncResult;
use crate::k8s::ClusterApi;
use crate::synchronizer::SyncReport;
use crate::synchronizer::WorkloadSynchronizer;

pub struct WorkloadContext {
    pub client: Client,
    pub cluster: Arc<dyn ClusterApi>,
    pub synchronizer: WorkloadSynchronizer,
    pub requeue: Duration,
}

type ReconcileResult = Result<Action, finalizer::Error<ReconcileError>>;

/// Runs until shutdown, synchronizing every workload in the cluster.
pub async fn run(ctx: Arc<WorkloadContext>) {
    let api: Api<RmdWorkload> = Api::all(ctx.client.clone());
    info!("Starting workload controller");
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(workload = %object.name, "Workload reconciled"),
                Err(e) => warn!("Workload reconciliation failed: {e}"),
            }
        })
        .await;
}

async fn reconcile(workload: Arc<RmdWorkload>, ctx: Arc<WorkloadContext>) -> ReconcileResult {
    let namespace = workload.namespace().unwrap_or_default();
    let api: Api<RmdWorkload> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, WORKLOAD_FINALIZER, workload, |event| async move {
        match event {
            Event::Apply(workload) => apply(&workload, &ctx).await.map_err(ReconcileError::from),
            Event::Cleanup(workload) => ctx
                .synchronizer
                .remove(&workload)
                .await
                .map(|()| Action::await_change())
                .map_err(ReconcileError::from),
        }
    })
    .await
}

async fn apply(workload: &RmdWorkload, ctx: &WorkloadContext) -> SyncResult<Action> {
    sync_and_evict(workload, &ctx.synchronizer, ctx.cluster.as_ref()).await?;
    Ok(Action::await_change())
}

/// Synchronizes `workload`, persists its status and deletes the pods whose
/// partition request the daemon refused.
///
/// # Errors
///
/// - [`SyncError::Status`] if the status cannot be written
/// - [`SyncError::NodesFailed`] if any node has to be retried
/// - any error of [`WorkloadSynchronizer::sync`]
pub async fn sync_and_evict(
    workload: &RmdWorkload,
    synchronizer: &WorkloadSynchronizer,
    cluster: &dyn ClusterApi,
) -> SyncResult<()> {
    let SyncReport {
        status,
        evictions,
        failed_nodes,
    } = synchronizer.sync(workload).await?;

    // Writing an unchanged status would only trigger another reconcile.
    if workload.status.as_ref() != Some(&status) {
        cluster
            .replace_workload_status(workload, status)
            .await
            .change_context_lazy(|| SyncError::Status {
                name: workload.name_any(),
            })?;
    }

    for eviction in evictions {
        info!(
            pod = %eviction.pod,
            namespace = %eviction.namespace,
            "Evicting pod whose cache request the daemon rejected"
        );
        if let Err(e) = cluster.delete_pod(&eviction.namespace, &eviction.pod).await {
            warn!(pod = %eviction.pod, "Failed to evict pod: {e:?}");
        }
    }

    if failed_nodes.is_empty() {
        Ok(())
    } else {
        Err(Report::new(SyncError::nodes_failed(&failed_nodes)))
    }
}

fn error_policy(
    workload: Arc<RmdWorkload>,
    error: &finalizer::Error<ReconcileError>,
    ctx: Arc<WorkloadContext>,
) -> Action {
    retry_after(workload.as_ref(), error, ctx.requeue)
}
