//! Naming conventions shared between the operator, the node agent and the daemon deployment.

/// Per-node daemon pods are named `<DAEMON_POD_PREFIX><nodeName>`.
pub const DAEMON_POD_PREFIX: &str = "rmd-";

/// Node agent pods are named `<NODE_AGENT_POD_PREFIX><suffix>`.
pub const NODE_AGENT_POD_PREFIX: &str = "rmd-node-agent-";

/// Node states are named `<NODE_STATE_PREFIX><nodeName>`.
pub const NODE_STATE_PREFIX: &str = "rmd-node-state-";

/// Extended resource a container limits to request L3 cache ways.
pub const CACHE_WAYS_RESOURCE: &str = "intel.com/l3_cache_ways";

/// Separates pod and container in derived workload names. Never valid inside a container name.
pub const WORKLOAD_NAME_SEPARATOR: &str = "-rmd-workload-";

/// Namespace used when a derived workload's pod reports none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Container port on which the daemon serves mutually authenticated TLS.
pub const DAEMON_TLS_PORT: i32 = 8443;

/// Name the daemon's serving certificate is issued for.
pub const DAEMON_SERVER_NAME: &str = "rmd";

pub const DEFAULT_CERT_PATH: &str = "/etc/certs/public/cert.pem";
pub const DEFAULT_KEY_PATH: &str = "/etc/certs/public/key.pem";
pub const DEFAULT_CA_PATH: &str = "/etc/certs/public/ca.pem";

/// Namespaces never searched when locating the node agent.
pub const SYSTEM_NAMESPACES: [&str; 3] = ["kube-system", "kube-public", "kube-node-lease"];

pub const WORKLOAD_FINALIZER: &str = "intel.com/rmd-workload-cleanup";
pub const NODE_STATE_FINALIZER: &str = "intel.com/rmd-node-registry";

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "rmd-operator";

/// Builds the derived workload name for one container of a pod.
pub fn workload_name(pod_name: &str, container_name: &str) -> String {
    format!("{pod_name}{WORKLOAD_NAME_SEPARATOR}{container_name}")
}

/// Recovers the owning pod name from a derived workload name.
pub fn pod_name_from_workload(workload_name: &str) -> Option<&str> {
    workload_name
        .split_once(WORKLOAD_NAME_SEPARATOR)
        .map(|(pod, _)| pod)
        .filter(|pod| !pod.is_empty())
}

pub fn daemon_pod_name(node_name: &str) -> String {
    format!("{DAEMON_POD_PREFIX}{node_name}")
}

pub fn node_state_name(node_name: &str) -> String {
    format!("{NODE_STATE_PREFIX}{node_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_name_round_trips_to_pod() {
        let name = workload_name("web-5d9f", "nginx");
        assert_eq!(name, "web-5d9f-rmd-workload-nginx");
        assert_eq!(pod_name_from_workload(&name), Some("web-5d9f"));
    }

    #[test]
    fn user_named_workload_has_no_pod() {
        assert_eq!(pod_name_from_workload("my-workload"), None);
        assert_eq!(pod_name_from_workload("-rmd-workload-x"), None);
    }
}
