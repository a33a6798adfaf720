//! Payloads of the RMD daemon REST API (`/v1/workloads`, `/v1/cache/l3`).

use std::collections::BTreeMap;
use std::num::ParseIntError;

use serde::Deserialize;
use serde::Serialize;

use crate::RmdWorkloadSpec;

/// One daemon-side partition assignment.
///
/// Empty strings and absent sub-objects are omitted on the wire; the daemon
/// treats missing fields as "not requested".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonWorkload {
    /// Daemon-issued identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// External identifier supplied by the operator
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub core_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cos_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdt: Option<DaemonRdt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<DaemonPlugins>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonRdt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<DaemonCache>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mba: Option<DaemonMba>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonCache {
    #[serde(default)]
    pub max: u32,
    #[serde(default)]
    pub min: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonMba {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbps: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonPlugins {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pstate: Option<DaemonPstate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonPstate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<String>,
}

impl DaemonWorkload {
    /// Builds the request body for a workload spec resolved to `core_ids`.
    ///
    /// A P-state ratio that is not a number is dropped.
    pub fn from_spec(uuid: String, core_ids: Vec<String>, spec: &RmdWorkloadSpec) -> Self {
        let cache = spec.rdt.cache;
        let mba = spec.rdt.mba;

        let cache = (cache.max != 0 || cache.min != 0).then_some(DaemonCache {
            max: cache.max,
            min: cache.min,
        });
        let mba = (mba.percentage != 0 || mba.mbps != 0).then_some(DaemonMba {
            percentage: (mba.percentage != 0).then_some(mba.percentage),
            mbps: (mba.mbps != 0).then_some(mba.mbps),
        });
        let rdt = (cache.is_some() || mba.is_some()).then_some(DaemonRdt { cache, mba });

        let pstate = &spec.plugins.pstate;
        let pstate = DaemonPstate {
            ratio: pstate.ratio.trim().parse::<f64>().ok(),
            monitoring: (!pstate.monitoring.is_empty()).then(|| pstate.monitoring.clone()),
        };
        let plugins = (pstate.ratio.is_some() || pstate.monitoring.is_some())
            .then_some(DaemonPlugins {
                pstate: Some(pstate),
            });

        Self {
            uuid,
            core_ids,
            policy: spec.policy.clone(),
            rdt,
            plugins,
            ..Default::default()
        }
    }

    /// Flattens the entry into a key-value snapshot.
    ///
    /// Only fields present on the entry are included; zero and empty values
    /// are left out rather than recorded as empty strings.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            if !value.is_empty() {
                out.insert(key.to_string(), value);
            }
        };

        put("id", self.id.clone());
        put("uuid", self.uuid.clone());
        put("core_ids", self.core_ids.join(","));
        put("task_ids", self.task_ids.join(","));
        put("policy", self.policy.clone());
        put("status", self.status.clone());
        put("cos_name", self.cos_name.clone());

        if let Some(rdt) = &self.rdt {
            if let Some(cache) = rdt.cache {
                put("cache_max", non_zero(cache.max));
                put("cache_min", non_zero(cache.min));
            }
            if let Some(mba) = rdt.mba {
                put("mba_percentage", mba.percentage.map(non_zero).unwrap_or_default());
                put("mba_mbps", mba.mbps.map(non_zero).unwrap_or_default());
            }
        }

        if let Some(pstate) = self.plugins.as_ref().and_then(|p| p.pstate.as_ref()) {
            put(
                "pstate_ratio",
                pstate.ratio.map(|r| r.to_string()).unwrap_or_default(),
            );
            put("pstate_monitoring", pstate.monitoring.clone().unwrap_or_default());
        }

        out
    }
}

fn non_zero(value: u32) -> String {
    if value == 0 {
        String::new()
    } else {
        value.to_string()
    }
}

/// Response of `GET /v1/cache/l3`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct L3CacheInfo {
    #[serde(default)]
    pub rdt: bool,
    #[serde(default)]
    pub cqm: bool,
    #[serde(default)]
    pub cdp: bool,
    #[serde(default)]
    pub cdp_enable: bool,
    #[serde(default)]
    pub cat: bool,
    #[serde(default)]
    pub cat_enable: bool,
    /// Cache id -> cache details
    #[serde(default)]
    pub caches: BTreeMap<String, CacheInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    #[serde(default)]
    pub num_ways: u32,
    #[serde(default)]
    pub num_sets: u32,
    #[serde(default)]
    pub num_partitions: u32,
    #[serde(default)]
    pub line_size: u32,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub way_size: u64,
    #[serde(default)]
    pub num_closs: u32,
    /// Hexadecimal bitmask of the ways still available, e.g. `"7ff"`
    #[serde(default)]
    pub available_ways: String,
    #[serde(default)]
    pub available_cpu: String,
}

/// Why a daemon's `available_ways` could not be totalled.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum AvailableWaysError {
    #[display("cache {cache}: invalid available ways {value:?}: {source}")]
    Parse {
        cache: String,
        value: String,
        source: ParseIntError,
    },
    #[display("available ways overflow at cache {cache}")]
    Overflow { cache: String },
}

impl std::error::Error for AvailableWaysError {}

impl L3CacheInfo {
    /// Sum of every cache's `available_ways`, each parsed as hexadecimal.
    pub fn available_ways_total(&self) -> Result<u64, AvailableWaysError> {
        self.caches.iter().try_fold(0u64, |total, (id, cache)| {
            let ways = parse_available_ways(&cache.available_ways).map_err(|source| {
                AvailableWaysError::Parse {
                    cache: id.clone(),
                    value: cache.available_ways.clone(),
                    source,
                }
            })?;
            total
                .checked_add(ways)
                .ok_or_else(|| AvailableWaysError::Overflow { cache: id.clone() })
        })
    }
}

/// Parses a hexadecimal `available_ways` value (`"7ff"` -> 2047).
pub fn parse_available_ways(hex: &str) -> Result<u64, ParseIntError> {
    let hex = hex.trim();
    let hex = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    u64::from_str_radix(hex, 16)
}
