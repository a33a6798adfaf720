//! Shared API type definitions
//!
//! This crate contains the custom resources exchanged with the Kubernetes API
//! server (`RmdWorkload`, `RmdNodeState`) and the payloads spoken by the
//! per-node RMD daemon's REST API.

mod daemon;
mod node_state;
mod workload;

pub use daemon::parse_available_ways;
pub use daemon::AvailableWaysError;
pub use daemon::CacheInfo;
pub use daemon::DaemonCache;
pub use daemon::DaemonMba;
pub use daemon::DaemonPlugins;
pub use daemon::DaemonPstate;
pub use daemon::DaemonRdt;
pub use daemon::DaemonWorkload;
pub use daemon::L3CacheInfo;
pub use node_state::RmdNodeState;
pub use node_state::RmdNodeStateSpec;
pub use node_state::RmdNodeStateStatus;
pub use workload::external_id;
pub use workload::Bandwidth;
pub use workload::CacheBounds;
pub use workload::CoreSelection;
pub use workload::Plugins;
pub use workload::Pstate;
pub use workload::Rdt;
pub use workload::RmdWorkload;
pub use workload::RmdWorkloadSpec;
pub use workload::RmdWorkloadStatus;
pub use workload::WorkloadState;
