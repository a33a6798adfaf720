use std::sync::Arc;
use std::time::Duration;

use error_stack::ResultExt;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
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
use crate::error::ReconcileError;
use crate::error::SyncError;
use crate::k8s::ClusterApi;

pub struct NodeLabelerContext {
    pub client: Client,
    pub cluster: Arc<dyn ClusterApi>,
    /// Namespace node states are created in
    pub namespace: String,
    pub requeue: Duration,
}

/// Runs until shutdown, creating a node state for every node matching
/// `label_selector`.
pub async fn run(ctx: Arc<NodeLabelerContext>, label_selector: &str) {
    let api: Api<Node> = Api::all(ctx.client.clone());
    info!(label_selector, "Starting node labeler");
    Controller::new(api, watcher::Config::default().labels(label_selector))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(node = %object.name, "Node registered"),
                Err(e) => warn!("Node registration failed: {e}"),
            }
        })
        .await;
}

async fn reconcile(node: Arc<Node>, ctx: Arc<NodeLabelerContext>) -> Result<Action, ReconcileError> {
    if node.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    ctx.cluster
        .ensure_node_state(&ctx.namespace, &node)
        .await
        .change_context_lazy(|| SyncError::RegisterNode {
            node: node.name_any(),
        })?;
    Ok(Action::await_change())
}

fn error_policy(node: Arc<Node>, error: &ReconcileError, ctx: Arc<NodeLabelerContext>) -> Action {
    retry_after(node.as_ref(), error, ctx.requeue)
}

