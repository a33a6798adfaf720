use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Per-node mirror of the entries live on that node's RMD daemon.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "intel.com",
    version = "v1alpha1",
    kind = "RmdNodeState",
    namespaced,
    status = "RmdNodeStateStatus",
    shortname = "rmdns"
)]
#[serde(rename_all = "camelCase")]
pub struct RmdNodeStateSpec {
    /// Name of the node this state mirrors
    pub node: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RmdNodeStateStatus {
    /// Daemon entry id -> flattened snapshot of that entry.
    ///
    /// Replaced wholesale on every poll, never merged.
    #[serde(default)]
    pub workloads: BTreeMap<String, BTreeMap<String, String>>,
    /// Sum of available L3 cache ways over every cache of the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_cache_ways: Option<u64>,
}
