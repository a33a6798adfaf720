//! Controller-runtime glue around the engines.
//!
//! The operator runs [`workload`], [`node_state`] and [`node_labeler`]; the
//! per-node agent runs [`pod`].

pub mod node_labeler;
pub mod node_state;
pub mod pod;
pub mod workload;

use std::fmt::Debug;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::warn;

/// Retry policy shared by every controller: log and try again after `requeue`.
pub(crate) fn retry_after<K, E>(object: &K, error: &E, requeue: Duration) -> Action
where
    K: ResourceExt,
    E: Debug,
{
    warn!(
        object = %object.name_any(),
        "Reconcile error, retrying in {requeue:?}: {error:?}"
    );
    Action::requeue(requeue)
}
