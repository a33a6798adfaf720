use std::collections::BTreeMap;
use std::collections::BTreeSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Desired RMD workload: "this partition configuration should exist on these nodes".
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "intel.com",
    version = "v1alpha1",
    kind = "RmdWorkload",
    namespaced,
    status = "RmdWorkloadStatus",
    shortname = "rmdwl"
)]
#[serde(rename_all = "camelCase")]
pub struct RmdWorkloadSpec {
    /// Nodes the entry must exist on
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Explicit core ids, ignored when `all_cores` is set
    #[serde(default)]
    pub cores: Vec<String>,
    /// Use every core of the node except `reserved_cpus`
    #[serde(default)]
    pub all_cores: bool,
    #[serde(default)]
    pub reserved_cpus: Vec<String>,
    #[serde(default)]
    pub rdt: Rdt,
    /// Named daemon policy preset
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy: String,
    #[serde(default)]
    pub plugins: Plugins,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rdt {
    #[serde(default)]
    pub cache: CacheBounds,
    #[serde(default)]
    pub mba: Bandwidth,
}

/// Cache-way bounds. Zero on both sides means "not requested".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheBounds {
    #[serde(default)]
    pub max: u32,
    #[serde(default)]
    pub min: u32,
}

/// Memory bandwidth allocation. Zero means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Bandwidth {
    #[serde(default)]
    pub percentage: u32,
    #[serde(default)]
    pub mbps: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plugins {
    #[serde(default)]
    pub pstate: Pstate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pstate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ratio: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub monitoring: String,
}

/// Status of an [`RmdWorkload`], keyed by node name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RmdWorkloadStatus {
    #[serde(default)]
    pub workload_states: BTreeMap<String, WorkloadState>,
}

/// Outcome of the last synchronization against one node's daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadState {
    /// Textual summary of the last daemon response, kept for operators
    #[serde(default)]
    pub response: String,
    /// Daemon-issued entry id
    #[serde(default)]
    pub id: String,
    /// Class-of-service name computed by the daemon
    #[serde(default)]
    pub cos_name: String,
    #[serde(default)]
    pub status: String,
}

/// How the cores of a workload are chosen on each node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreSelection {
    Explicit(Vec<String>),
    /// Every core of the node minus the reserved set
    AllExcept(BTreeSet<String>),
}

impl CoreSelection {
    /// Resolves the selection against a node with `cpu_count` logical cores.
    pub fn resolve(&self, cpu_count: usize) -> Vec<String> {
        match self {
            Self::Explicit(cores) => cores.clone(),
            Self::AllExcept(reserved) => (0..cpu_count)
                .map(|id| id.to_string())
                .filter(|id| !reserved.contains(id))
                .collect(),
        }
    }
}

impl RmdWorkloadSpec {
    pub fn core_selection(&self) -> CoreSelection {
        if self.all_cores {
            CoreSelection::AllExcept(self.reserved_cpus.iter().cloned().collect())
        } else {
            CoreSelection::Explicit(self.cores.clone())
        }
    }

    /// Deduplicated, ordered view of `nodes`.
    pub fn target_nodes(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(String::as_str).collect()
    }
}

/// Maps a workload's `(name, namespace)` identity to the external identifier
/// (`uuid`) of its daemon-side entry, `<name>.<namespace>`.
///
/// Every lookup, create and delete goes through this mapping; two workloads
/// sharing a name in different namespaces never share an entry.
pub fn external_id(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}")
}
