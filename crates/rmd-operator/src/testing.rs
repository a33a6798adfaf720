//! In-memory stand-ins for the daemon, the cluster and the kubelet, used by
//! the engine tests.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use api_types::DaemonWorkload;
use api_types::L3CacheInfo;
use api_types::RmdNodeState;
use api_types::RmdNodeStateSpec;
use api_types::RmdNodeStateStatus;
use api_types::RmdWorkload;
use api_types::RmdWorkloadSpec;
use api_types::RmdWorkloadStatus;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::NodeStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::consts::daemon_pod_name;
use crate::consts::node_state_name;
use crate::consts::DAEMON_TLS_PORT;
use crate::daemon::DaemonApi;
use crate::daemon::DaemonError;
use crate::daemon::DaemonResult;
use crate::introspection::ContainerResources;
use crate::introspection::IntrospectionResult;
use crate::introspection::PodResources;
use crate::introspection::PodResourcesSource;
use crate::k8s::ClusterApi;
use crate::k8s::ClusterError;
use crate::k8s::ClusterResult;

/// How a fake daemon instance answers create requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateBehavior {
    Accept,
    /// Answers 200 but never stores the entry
    Drop,
    /// Answers with a 400 status
    Reject,
}

#[derive(Debug, Default)]
struct DaemonState {
    entries: BTreeMap<String, Vec<DaemonWorkload>>,
    create_behavior: BTreeMap<String, CreateBehavior>,
    unreachable: BTreeSet<String>,
    l3_cache: BTreeMap<String, L3CacheInfo>,
    calls: Vec<String>,
    next_id: u64,
}

/// Daemon instances keyed by base URL (`http://<ip>:<port>`).
#[derive(Debug, Clone, Default)]
pub struct FakeDaemon {
    state: Arc<Mutex<DaemonState>>,
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(ip: &str) -> String {
        format!("http://{ip}:{DAEMON_TLS_PORT}")
    }

    /// Entries currently held by the instance at `address`.
    pub fn entries(&self, address: &str) -> Vec<DaemonWorkload> {
        let state = self.state.lock().unwrap();
        state.entries.get(address).cloned().unwrap_or_default()
    }

    /// Seeds an entry as if it had been created earlier.
    pub fn insert(&self, address: &str, uuid: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .entries
            .entry(address.to_string())
            .or_default()
            .push(DaemonWorkload {
                id: id.clone(),
                uuid: uuid.to_string(),
                status: "Successful".to_string(),
                cos_name: format!("{uuid}-guarantee"),
                ..Default::default()
            });
        id
    }

    /// Removes an entry behind the operator's back.
    pub fn forget(&self, address: &str, uuid: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entries) = state.entries.get_mut(address) {
            entries.retain(|entry| entry.uuid != uuid);
        }
    }

    pub fn set_create_behavior(&self, address: &str, behavior: CreateBehavior) {
        let mut state = self.state.lock().unwrap();
        state.create_behavior.insert(address.to_string(), behavior);
    }

    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut state = self.state.lock().unwrap();
        if unreachable {
            state.unreachable.insert(address.to_string());
        } else {
            state.unreachable.remove(address);
        }
    }

    pub fn set_l3_cache(&self, address: &str, info: L3CacheInfo) {
        let mut state = self.state.lock().unwrap();
        state.l3_cache.insert(address.to_string(), info);
    }

    /// Calls made so far, as `"<METHOD> <address>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, method: &str, address: &str) -> DaemonResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{method} {address}"));
        if state.unreachable.contains(address) {
            return Err(Report::new(DaemonError::Transport {
                address: address.to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl DaemonApi for FakeDaemon {
    fn address_prefix(&self) -> &'static str {
        "http://"
    }

    async fn get_workloads(&self, address: &str) -> DaemonResult<Vec<DaemonWorkload>> {
        self.record("GET", address)?;
        Ok(self.entries(address))
    }

    async fn create_workload(
        &self,
        address: &str,
        workload: &DaemonWorkload,
    ) -> DaemonResult<String> {
        self.record("POST", address)?;
        let mut state = self.state.lock().unwrap();
        let behavior = state
            .create_behavior
            .get(address)
            .copied()
            .unwrap_or(CreateBehavior::Accept);
        match behavior {
            CreateBehavior::Accept => {
                state.next_id += 1;
                let mut stored = workload.clone();
                stored.id = state.next_id.to_string();
                stored.status = "Successful".to_string();
                stored.cos_name = format!("{}-guarantee", workload.uuid);
                state.entries.entry(address.to_string()).or_default().push(stored);
                Ok("Success: 201".to_string())
            }
            CreateBehavior::Drop => Ok("Success: 200".to_string()),
            CreateBehavior::Reject => Err(Report::new(DaemonError::Rejected {
                status: 400,
                body: "not enough cache ways".to_string(),
            })),
        }
    }

    async fn update_workload(
        &self,
        address: &str,
        id: &str,
        workload: &DaemonWorkload,
    ) -> DaemonResult<String> {
        self.record("PATCH", address)?;
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get_mut(address)
            .and_then(|entries| entries.iter_mut().find(|entry| entry.id == id))
            .ok_or_else(|| {
                Report::new(DaemonError::Rejected {
                    status: 404,
                    body: format!("workload {id} not found"),
                })
            })?;
        entry.core_ids = workload.core_ids.clone();
        entry.policy = workload.policy.clone();
        entry.rdt = workload.rdt.clone();
        entry.plugins = workload.plugins.clone();
        Ok("Success: 200".to_string())
    }

    async fn delete_workload(&self, address: &str, id: &str) -> DaemonResult<()> {
        self.record("DELETE", address)?;
        let mut state = self.state.lock().unwrap();
        if let Some(entries) = state.entries.get_mut(address) {
            entries.retain(|entry| entry.id != id);
        }
        Ok(())
    }

    async fn get_l3_cache(&self, address: &str) -> DaemonResult<L3CacheInfo> {
        self.record("GET", address)?;
        let state = self.state.lock().unwrap();
        state
            .l3_cache
            .get(address)
            .cloned()
            .ok_or_else(|| Report::new(DaemonError::Decode))
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    node_states: Vec<RmdNodeState>,
    pods: BTreeMap<(String, String), Pod>,
    nodes: BTreeMap<String, Node>,
    workload_statuses: BTreeMap<(String, String), RmdWorkloadStatus>,
    node_state_statuses: BTreeMap<(String, String), RmdNodeStateStatus>,
    applied: BTreeMap<(String, String), RmdWorkload>,
    deleted_pods: Vec<(String, String)>,
    api_down: bool,
}

/// Cluster objects held in memory.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a daemon-eligible node: its node state in `namespace`, its
    /// daemon pod at `ip` and a node object with `cpus` logical CPUs.
    pub fn add_daemon_node(&self, node: &str, namespace: &str, ip: &str, cpus: usize) {
        self.add_node_state(node_state(node, namespace));
        self.add_pod(daemon_pod(node, namespace, Some(ip)));
        self.add_node(cluster_node(node, cpus));
    }

    pub fn add_node_state(&self, node_state: RmdNodeState) {
        self.state.lock().unwrap().node_states.push(node_state);
    }

    pub fn remove_node_state(&self, node: &str) {
        let mut state = self.state.lock().unwrap();
        state.node_states.retain(|ns| ns.spec.node != node);
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (pod.namespace().unwrap_or_default(), pod.name_any());
        self.state.lock().unwrap().pods.insert(key, pod);
    }

    pub fn add_node(&self, node: Node) {
        let name = node.name_any();
        self.state.lock().unwrap().nodes.insert(name, node);
    }

    pub fn set_api_down(&self, down: bool) {
        self.state.lock().unwrap().api_down = down;
    }

    pub fn workload_status(&self, namespace: &str, name: &str) -> Option<RmdWorkloadStatus> {
        let state = self.state.lock().unwrap();
        state
            .workload_statuses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn clear_workload_statuses(&self) {
        self.state.lock().unwrap().workload_statuses.clear();
    }

    pub fn node_state_status(&self, namespace: &str, name: &str) -> Option<RmdNodeStateStatus> {
        let state = self.state.lock().unwrap();
        state
            .node_state_statuses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn applied_workloads(&self) -> Vec<RmdWorkload> {
        self.state.lock().unwrap().applied.values().cloned().collect()
    }

    pub fn deleted_pods(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted_pods.clone()
    }

    fn check_api(&self) -> ClusterResult<()> {
        if self.state.lock().unwrap().api_down {
            return Err(Report::new(ClusterError::Api {
                message: "connection refused".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_node_states(&self) -> ClusterResult<Vec<RmdNodeState>> {
        self.check_api()?;
        Ok(self.state.lock().unwrap().node_states.clone())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>> {
        self.check_api()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_node(&self, name: &str) -> ClusterResult<Option<Node>> {
        self.check_api()?;
        Ok(self.state.lock().unwrap().nodes.get(name).cloned())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.check_api()?;
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        state.pods.remove(&key);
        state.deleted_pods.push(key);
        Ok(())
    }

    async fn replace_workload_status(
        &self,
        workload: &RmdWorkload,
        status: RmdWorkloadStatus,
    ) -> ClusterResult<()> {
        self.check_api()?;
        let key = (workload.namespace().unwrap_or_default(), workload.name_any());
        self.state.lock().unwrap().workload_statuses.insert(key, status);
        Ok(())
    }

    async fn replace_node_state_status(
        &self,
        node_state: &RmdNodeState,
        status: RmdNodeStateStatus,
    ) -> ClusterResult<()> {
        self.check_api()?;
        let key = (node_state.namespace().unwrap_or_default(), node_state.name_any());
        self.state.lock().unwrap().node_state_statuses.insert(key, status);
        Ok(())
    }

    async fn apply_workload(&self, workload: &RmdWorkload) -> ClusterResult<()> {
        self.check_api()?;
        let key = (workload.namespace().unwrap_or_default(), workload.name_any());
        self.state.lock().unwrap().applied.insert(key, workload.clone());
        Ok(())
    }

    async fn find_pod_outside_system_namespaces(&self, name: &str) -> ClusterResult<Option<Pod>> {
        self.check_api()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .find(|((namespace, pod_name), _)| {
                pod_name == name
                    && !crate::consts::SYSTEM_NAMESPACES.contains(&namespace.as_str())
            })
            .map(|(_, pod)| pod.clone()))
    }

    async fn ensure_node_state(&self, namespace: &str, node: &Node) -> ClusterResult<()> {
        self.check_api()?;
        let node_name = node.name_any();
        let mut state = self.state.lock().unwrap();
        if !state.node_states.iter().any(|ns| ns.spec.node == node_name) {
            state.node_states.push(node_state(&node_name, namespace));
        }
        Ok(())
    }
}

/// Pod resources served from memory; clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct StaticPodResources {
    pods: Arc<Mutex<Vec<PodResources>>>,
    list_calls: Arc<Mutex<usize>>,
}

impl StaticPodResources {
    pub fn new(pods: Vec<PodResources>) -> Self {
        Self {
            pods: Arc::new(Mutex::new(pods)),
            list_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn replace(&self, pods: Vec<PodResources>) {
        *self.pods.lock().unwrap() = pods;
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }
}

#[async_trait]
impl PodResourcesSource for StaticPodResources {
    async fn list(&self) -> IntrospectionResult<Vec<PodResources>> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(self.pods.lock().unwrap().clone())
    }
}

pub fn pod_resources(
    namespace: &str,
    name: &str,
    containers: Vec<ContainerResources>,
) -> PodResources {
    PodResources {
        name: name.to_string(),
        namespace: namespace.to_string(),
        containers,
    }
}

pub fn container(name: &str, cpu_ids: Vec<i64>) -> ContainerResources {
    ContainerResources {
        name: name.to_string(),
        cpu_ids,
    }
}

pub fn node_state(node: &str, namespace: &str) -> RmdNodeState {
    let mut node_state = RmdNodeState::new(
        &node_state_name(node),
        RmdNodeStateSpec {
            node: node.to_string(),
            node_uid: format!("{node}-uid"),
        },
    );
    node_state.metadata.namespace = Some(namespace.to_string());
    node_state
}

pub fn daemon_pod(node: &str, namespace: &str, ip: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(daemon_pod_name(node)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            containers: vec![Container {
                name: "rmd".to_string(),
                ports: Some(vec![ContainerPort {
                    container_port: DAEMON_TLS_PORT,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            pod_ip: ip.map(str::to_string),
            ..Default::default()
        }),
    }
}

pub fn cluster_node(name: &str, cpus: usize) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("{name}-uid")),
            ..Default::default()
        },
        status: Some(NodeStatus {
            capacity: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity(cpus.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn workload(name: &str, namespace: &str, nodes: &[&str], cores: &[&str]) -> RmdWorkload {
    let mut workload = RmdWorkload::new(
        name,
        RmdWorkloadSpec {
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            cores: cores.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        },
    );
    workload.metadata.namespace = Some(namespace.to_string());
    workload
}
