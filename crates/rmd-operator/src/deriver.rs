//! Synthesizes [`RmdWorkload`]s from pods that limit the L3 cache-way resource.
//!
//! A container qualifies when its pod runs on this agent's node in the
//! Guaranteed QoS class and the container asks for whole CPUs. The exclusive
//! CPUs the kubelet pinned to it become the workload's cores; the resource
//! limit becomes the cache-way bounds; `<container>_<field>` annotations fill
//! in the optional settings.

use core::error::Error;

use api_types::Bandwidth;
use api_types::CacheBounds;
use api_types::Plugins;
use api_types::Pstate;
use api_types::Rdt;
use api_types::RmdWorkload;
use api_types::RmdWorkloadSpec;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::Resource;
use kube::ResourceExt;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::consts::workload_name;
use crate::consts::CACHE_WAYS_RESOURCE;
use crate::consts::DEFAULT_NAMESPACE;
use crate::consts::WORKLOAD_NAME_SEPARATOR;
use crate::introspection::PodResourcesSource;
use crate::introspection::ResourceIntrospector;

const RUNNING_PHASE: &str = "Running";
const GUARANTEED_QOS: &str = "Guaranteed";

pub type DeriveResult<T> = Result<T, Report<DeriveError>>;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum DeriveError {
    #[display("pod {pod} has no UID")]
    MissingUid { pod: String },
    #[display("no CPUs pinned to container {container} of pod {pod}")]
    NoCpus { pod: String, container: String },
    #[display("invalid {resource} quantity {value:?} on container {container}")]
    Quantity {
        container: String,
        resource: String,
        value: String,
    },
}

impl Error for DeriveError {}

/// Optional per-container settings read from pod annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Overrides {
    policy: String,
    mba_percentage: u32,
    mba_mbps: u32,
    pstate_ratio: String,
    pstate_monitoring: String,
}

pub struct WorkloadDeriver<S> {
    introspector: ResourceIntrospector<S>,
}

impl<S: PodResourcesSource> WorkloadDeriver<S> {
    pub fn new(introspector: ResourceIntrospector<S>) -> Self {
        Self { introspector }
    }

    /// Derives one workload per qualifying container of `pod`.
    ///
    /// `agent_host_ip` is the host IP of this node's agent; pods on other
    /// hosts yield nothing, as do pods that are not running yet.
    ///
    /// # Errors
    ///
    /// - [`DeriveError::MissingUid`] if a qualifying container's pod has no UID
    /// - [`DeriveError::NoCpus`] if no CPUs are pinned to a qualifying container
    /// - [`DeriveError::Quantity`] if a CPU or cache-way quantity does not parse
    #[instrument(skip_all, fields(pod = %pod.name_any()))]
    pub async fn derive(&self, pod: &Pod, agent_host_ip: &str) -> DeriveResult<Vec<RmdWorkload>> {
        let Some(status) = pod.status.as_ref() else {
            return Ok(Vec::new());
        };
        if status.phase.as_deref() != Some(RUNNING_PHASE) {
            debug!("Pod is not running yet");
            return Ok(Vec::new());
        }
        if status.host_ip.as_deref() != Some(agent_host_ip) {
            debug!("Pod runs on another host");
            return Ok(Vec::new());
        }
        let Some(spec) = pod.spec.as_ref() else {
            return Ok(Vec::new());
        };

        let guaranteed = status.qos_class.as_deref() == Some(GUARANTEED_QOS);
        let containers = spec
            .containers
            .iter()
            .chain(spec.init_containers.iter().flatten());

        let mut workloads = Vec::new();
        for container in containers {
            let Some(limit) = cache_ways_limit(container) else {
                continue;
            };
            if container.name.contains(WORKLOAD_NAME_SEPARATOR) {
                warn!(
                    container = %container.name,
                    "Container name contains {WORKLOAD_NAME_SEPARATOR:?}, skipping"
                );
                continue;
            }
            if !guaranteed || !whole_cpu_request(container)? {
                debug!(container = %container.name, "Container has no exclusive CPUs, skipping");
                continue;
            }

            workloads.push(self.derive_container(pod, container, limit).await?);
        }

        Ok(workloads)
    }

    async fn derive_container(
        &self,
        pod: &Pod,
        container: &Container,
        limit: &Quantity,
    ) -> DeriveResult<RmdWorkload> {
        let pod_name = pod.name_any();
        let namespace = pod_namespace(pod);
        if pod.uid().unwrap_or_default().is_empty() {
            return Err(Report::new(DeriveError::MissingUid { pod: pod_name }));
        }

        let no_cpus = || DeriveError::NoCpus {
            pod: pod_name.clone(),
            container: container.name.clone(),
        };
        let cores = self
            .introspector
            .container_cpus(&namespace, &pod_name, &container.name)
            .await
            .change_context_lazy(no_cpus)?;
        if cores.is_empty() {
            return Err(Report::new(no_cpus()));
        }

        let ways = parse_whole(limit).ok_or_else(|| {
            Report::new(DeriveError::Quantity {
                container: container.name.clone(),
                resource: CACHE_WAYS_RESOURCE.to_string(),
                value: limit.0.clone(),
            })
        })?;
        // A single limit value cannot express distinct bounds.
        let cache = CacheBounds {
            max: ways,
            min: ways,
        };

        let overrides = annotation_overrides(pod, &container.name);
        let node = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .into_iter()
            .collect();

        let mut workload = RmdWorkload::new(
            &workload_name(&pod_name, &container.name),
            RmdWorkloadSpec {
                nodes: node,
                cores,
                rdt: Rdt {
                    cache,
                    mba: Bandwidth {
                        percentage: overrides.mba_percentage,
                        mbps: overrides.mba_mbps,
                    },
                },
                policy: overrides.policy,
                plugins: Plugins {
                    pstate: Pstate {
                        ratio: overrides.pstate_ratio,
                        monitoring: overrides.pstate_monitoring,
                    },
                },
                ..Default::default()
            },
        );
        workload.metadata.namespace = Some(namespace);
        workload.metadata.owner_references = pod.controller_owner_ref(&()).map(|owner| vec![owner]);

        debug!(
            container = %container.name,
            workload = %workload.name_any(),
            ways,
            "Derived workload"
        );
        Ok(workload)
    }
}

/// The pod's namespace, or the default one when unset.
fn pod_namespace(pod: &Pod) -> String {
    pod.namespace()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

fn cache_ways_limit(container: &Container) -> Option<&Quantity> {
    container
        .resources
        .as_ref()?
        .limits
        .as_ref()?
        .get(CACHE_WAYS_RESOURCE)
}

/// Whether the container's CPU request is a whole number of cores.
fn whole_cpu_request(container: &Container) -> DeriveResult<bool> {
    let Some(request) = container
        .resources
        .as_ref()
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get("cpu"))
    else {
        return Ok(false);
    };
    let millis = parse_millis(request).ok_or_else(|| {
        Report::new(DeriveError::Quantity {
            container: container.name.clone(),
            resource: "cpu".to_string(),
            value: request.0.clone(),
        })
    })?;
    Ok(millis > 0 && millis % 1000 == 0)
}

/// Parses a quantity such as `"2"`, `"1.5"` or `"1500m"` into thousandths.
fn parse_millis(quantity: &Quantity) -> Option<u64> {
    let value = quantity.0.trim();
    if let Some(millis) = value.strip_suffix('m') {
        return millis.parse().ok();
    }
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    if fraction.len() > 3 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<3}").parse().ok()?
    };
    whole.checked_mul(1000)?.checked_add(fraction)
}

fn parse_whole(quantity: &Quantity) -> Option<u32> {
    let millis = parse_millis(quantity)?;
    if millis % 1000 != 0 {
        return None;
    }
    u32::try_from(millis / 1000).ok()
}

/// Reads `<container>_<field>` annotations.
///
/// Keys are matched by container-name prefix and field suffix, not parsed
/// exactly, so `web-sidecar_policy` also applies to container `web`. Keys that
/// match no field are ignored, as are integer fields that do not parse.
fn annotation_overrides(pod: &Pod, container: &str) -> Overrides {
    let mut overrides = Overrides::default();
    for (key, value) in pod.annotations() {
        if !key.starts_with(container) {
            continue;
        }
        if key.ends_with("_policy") {
            if !value.is_empty() {
                overrides.policy = value.clone();
            }
        } else if key.ends_with("_mba_percentage") {
            if let Ok(percentage) = value.trim().parse() {
                overrides.mba_percentage = percentage;
            }
        } else if key.ends_with("_mba_mbps") {
            if let Ok(mbps) = value.trim().parse() {
                overrides.mba_mbps = mbps;
            }
        } else if key.ends_with("_pstate_ratio") {
            if !value.is_empty() {
                overrides.pstate_ratio = value.clone();
            }
        } else if key.ends_with("_pstate_monitoring") && !value.is_empty() {
            overrides.pstate_monitoring = value.clone();
        }
    }
    overrides
}
