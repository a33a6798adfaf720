use api_types::RmdNodeState;
use api_types::RmdNodeStateSpec;
use api_types::RmdNodeStateStatus;
use api_types::RmdWorkload;
use api_types::RmdWorkloadStatus;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use tracing::debug;
use tracing::info;

use super::ClusterApi;
use super::ClusterError;
use super::ClusterResult;
use crate::consts::node_state_name;
use crate::consts::FIELD_MANAGER;
use crate::consts::SYSTEM_NAMESPACES;

/// [`ClusterApi`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn api_error(action: impl Into<String>) -> ClusterError {
    ClusterError::Api {
        message: action.into(),
    }
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_node_states(&self) -> ClusterResult<Vec<RmdNodeState>> {
        let api: Api<RmdNodeState> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .change_context_lazy(|| api_error("listing node states"))?;
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .change_context_lazy(|| api_error(format!("getting pod {namespace}/{name}")))
    }

    async fn get_node(&self, name: &str) -> ClusterResult<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .change_context_lazy(|| api_error(format!("getting node {name}")))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(pod = name, namespace, "Deleted pod");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!(pod = name, namespace, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(Report::new(e)
                .change_context(api_error(format!("deleting pod {namespace}/{name}")))),
        }
    }

    async fn replace_workload_status(
        &self,
        workload: &RmdWorkload,
        status: RmdWorkloadStatus,
    ) -> ClusterResult<()> {
        let name = workload.name_any();
        let namespace = workload.namespace().unwrap_or_default();
        let api: Api<RmdWorkload> = Api::namespaced(self.client.clone(), &namespace);

        let mut latest = api
            .get_status(&name)
            .await
            .change_context_lazy(|| api_error(format!("getting workload {namespace}/{name}")))?;
        latest.status = Some(status);
        let data = serde_json::to_vec(&latest)
            .change_context_lazy(|| api_error("encoding workload status"))?;
        api.replace_status(&name, &PostParams::default(), data)
            .await
            .change_context_lazy(|| {
                api_error(format!("replacing status of workload {namespace}/{name}"))
            })?;
        Ok(())
    }

    async fn replace_node_state_status(
        &self,
        node_state: &RmdNodeState,
        status: RmdNodeStateStatus,
    ) -> ClusterResult<()> {
        let name = node_state.name_any();
        let namespace = node_state.namespace().unwrap_or_default();
        let api: Api<RmdNodeState> = Api::namespaced(self.client.clone(), &namespace);

        let mut latest = api
            .get_status(&name)
            .await
            .change_context_lazy(|| api_error(format!("getting node state {namespace}/{name}")))?;
        latest.status = Some(status);
        let data = serde_json::to_vec(&latest)
            .change_context_lazy(|| api_error("encoding node state status"))?;
        api.replace_status(&name, &PostParams::default(), data)
            .await
            .change_context_lazy(|| {
                api_error(format!("replacing status of node state {namespace}/{name}"))
            })?;
        Ok(())
    }

    async fn apply_workload(&self, workload: &RmdWorkload) -> ClusterResult<()> {
        let name = workload.name_any();
        let namespace = workload.namespace().unwrap_or_default();
        let api: Api<RmdWorkload> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(workload),
        )
        .await
        .change_context_lazy(|| api_error(format!("applying workload {namespace}/{name}")))?;
        Ok(())
    }

    async fn find_pod_outside_system_namespaces(&self, name: &str) -> ClusterResult<Option<Pod>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = namespaces
            .list(&ListParams::default())
            .await
            .change_context_lazy(|| api_error("listing namespaces"))?;

        for namespace in namespaces.items {
            let namespace = namespace.name_any();
            if SYSTEM_NAMESPACES.contains(&namespace.as_str()) {
                continue;
            }
            if let Some(pod) = self.get_pod(&namespace, name).await? {
                return Ok(Some(pod));
            }
        }
        Ok(None)
    }

    async fn ensure_node_state(&self, namespace: &str, node: &Node) -> ClusterResult<()> {
        let node_name = node.name_any();
        let name = node_state_name(&node_name);
        let api: Api<RmdNodeState> = Api::namespaced(self.client.clone(), namespace);

        let existing = api
            .get_opt(&name)
            .await
            .change_context_lazy(|| api_error(format!("getting node state {namespace}/{name}")))?;
        if existing.is_some() {
            return Ok(());
        }

        let mut node_state = RmdNodeState::new(
            &name,
            RmdNodeStateSpec {
                node: node_name.clone(),
                node_uid: node.uid().unwrap_or_default(),
            },
        );
        node_state.metadata.namespace = Some(namespace.to_string());
        // Deleting the node garbage-collects its node state.
        node_state.metadata.owner_references = node.controller_owner_ref(&()).map(|owner| vec![owner]);
        api.create(&PostParams::default(), &node_state)
            .await
            .change_context_lazy(|| api_error(format!("creating node state {namespace}/{name}")))?;
        info!(node = %node_name, namespace, "Created node state");
        Ok(())
    }
}
