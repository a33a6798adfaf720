use core::error::Error;

use error_stack::Report;

use crate::daemon::DaemonError;

pub type SyncResult<T> = Result<T, Report<SyncError>>;

/// Failures of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum SyncError {
    #[display("failed to list node states")]
    ListNodeStates,
    #[display("no node state found for node {node}")]
    NodeStateMissing { node: String },
    #[display("failed to resolve daemon address for node {node}")]
    DaemonAddress { node: String },
    #[display("failed to resolve cores for node {node}")]
    NodeCores { node: String },
    #[display("daemon call failed on node {node}")]
    Daemon { node: String },
    #[display("failed to update status of {name}")]
    Status { name: String },
    #[display("reconciliation failed on nodes: {nodes}")]
    NodesFailed { nodes: String },
    #[display("failed to locate node agent pod {pod}")]
    AgentHost { pod: String },
    #[display("failed to derive workloads from pod {pod}")]
    Derive { pod: String },
    #[display("failed to apply workload {name}")]
    Apply { name: String },
    #[display("failed to register node {node}")]
    RegisterNode { node: String },
}

impl Error for SyncError {}

impl SyncError {
    pub fn nodes_failed(nodes: &[String]) -> Self {
        Self::NodesFailed {
            nodes: nodes.join(", "),
        }
    }
}

/// Text recorded in status for a failed node: the daemon's own summary when
/// the failure came from a daemon call, otherwise the outermost context.
pub fn status_summary(report: &Report<SyncError>) -> String {
    report
        .downcast_ref::<DaemonError>()
        .map(ToString::to_string)
        .unwrap_or_else(|| report.current_context().to_string())
}

/// Boundary type for the controller runtime, which needs a `std::error::Error`.
#[derive(Debug)]
pub struct ReconcileError(pub Report<SyncError>);

impl core::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Error for ReconcileError {}

impl From<Report<SyncError>> for ReconcileError {
    fn from(report: Report<SyncError>) -> Self {
        Self(report)
    }
}

#[cfg(test)]
mod tests {
    use error_stack::ResultExt;

    use super::*;

    #[test]
    fn daemon_summary_wins_over_outer_context() {
        let result: Result<(), Report<DaemonError>> = Err(Report::new(DaemonError::Rejected {
            status: 500,
            body: "boom".to_string(),
        }));
        let report = result
            .change_context(SyncError::Daemon {
                node: "node-a".to_string(),
            })
            .unwrap_err();
        assert_eq!(status_summary(&report), "Fail: 500 boom");
    }

    #[test]
    fn non_daemon_failure_uses_context() {
        let report = Report::new(SyncError::DaemonAddress {
            node: "node-a".to_string(),
        });
        assert_eq!(
            status_summary(&report),
            "failed to resolve daemon address for node node-a"
        );
    }
}
