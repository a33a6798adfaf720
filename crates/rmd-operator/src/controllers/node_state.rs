use std::sync::Arc;
use std::time::Duration;

use api_types::RmdNodeState;
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
use crate::consts::NODE_STATE_FINALIZER;
use crate::error::ReconcileError;
use crate::reporter::NodeStateReporter;

pub struct NodeStateContext {
    pub client: Client,
    pub reporter: NodeStateReporter,
    /// Interval between polls of one node's daemon
    pub requeue: Duration,
}

/// Runs until shutdown, polling the daemon of every node state.
pub async fn run(ctx: Arc<NodeStateContext>) {
    let api: Api<RmdNodeState> = Api::all(ctx.client.clone());
    info!("Starting node state controller");
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(node_state = %object.name, "Node state polled"),
                Err(e) => warn!("Node state reconciliation failed: {e}"),
            }
        })
        .await;
}

async fn reconcile(
    node_state: Arc<RmdNodeState>,
    ctx: Arc<NodeStateContext>,
) -> Result<Action, finalizer::Error<ReconcileError>> {
    let namespace = node_state.namespace().unwrap_or_default();
    let api: Api<RmdNodeState> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, NODE_STATE_FINALIZER, node_state, |event| async move {
        match event {
            Event::Apply(node_state) => ctx
                .reporter
                .poll(&node_state)
                .await
                .map(|_| Action::requeue(ctx.requeue))
                .map_err(ReconcileError::from),
            Event::Cleanup(node_state) => {
                ctx.reporter.forget(&node_state);
                Ok(Action::await_change())
            }
        }
    })
    .await
}

fn error_policy(
    node_state: Arc<RmdNodeState>,
    error: &finalizer::Error<ReconcileError>,
    ctx: Arc<NodeStateContext>,
) -> Action {
    retry_after(node_state.as_ref(), error, ctx.requeue)
}
