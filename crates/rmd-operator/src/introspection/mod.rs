//! Exclusive CPU sets of running containers, as reported by the kubelet.

mod kubelet;

use core::error::Error;

use async_trait::async_trait;
use error_stack::Report;

pub use kubelet::ContainerResources;
pub use kubelet::KubeletPodResources;
pub use kubelet::PodResources;

pub type IntrospectionResult<T> = Result<T, Report<IntrospectionError>>;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum IntrospectionError {
    #[display("failed to connect to pod resources socket {path}")]
    Connect { path: String },
    #[display("pod resources list call failed")]
    List,
    #[display("no CPUs found for container {container} of pod {pod}")]
    NotFound { pod: String, container: String },
}

impl Error for IntrospectionError {}

/// Lists the resources currently allocated to every pod on this node.
#[async_trait]
pub trait PodResourcesSource: Send + Sync {
    async fn list(&self) -> IntrospectionResult<Vec<PodResources>>;
}

/// Looks up the CPUs pinned to one container.
pub struct ResourceIntrospector<S> {
    source: S,
}

impl<S: PodResourcesSource> ResourceIntrospector<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// CPU ids pinned to `container` of pod `namespace/pod`, as sorted
    /// decimal strings.
    ///
    /// Lists afresh on every call.
    ///
    /// # Errors
    ///
    /// - [`IntrospectionError::NotFound`] if no namespace, pod and container match exactly
    /// - any error of the underlying source
    pub async fn container_cpus(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> IntrospectionResult<Vec<String>> {
        let pods = self.source.list().await?;

        let mut cpu_ids = pods
            .iter()
            .filter(|p| p.namespace == namespace && p.name == pod)
            .flat_map(|p| p.containers.iter())
            .find(|c| c.name == container)
            .map(|c| c.cpu_ids.clone())
            .ok_or_else(|| {
                Report::new(IntrospectionError::NotFound {
                    pod: format!("{namespace}/{pod}"),
                    container: container.to_string(),
                })
            })?;

        cpu_ids.sort_unstable();
        Ok(cpu_ids.into_iter().map(|id| id.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::container;
    use crate::testing::pod_resources;
    use crate::testing::StaticPodResources;

    #[test_log::test(tokio::test)]
    async fn cpus_are_sorted_numerically() {
        let source = StaticPodResources::new(vec![pod_resources(
            "shop",
            "web",
            vec![container("nginx", vec![12, 3, 10, 2])],
        )]);
        let introspector = ResourceIntrospector::new(source);

        let cpus = introspector.container_cpus("shop", "web", "nginx").await.unwrap();
        assert_eq!(cpus, vec!["2", "3", "10", "12"]);
    }

    #[test_log::test(tokio::test)]
    async fn match_is_exact() {
        let source = StaticPodResources::new(vec![
            pod_resources("shop", "web-1", vec![container("nginx", vec![4])]),
            pod_resources("shop", "web", vec![container("nginx-sidecar", vec![5])]),
        ]);
        let introspector = ResourceIntrospector::new(source);

        let err = introspector.container_cpus("shop", "web", "nginx").await.unwrap_err();
        assert!(matches!(err.current_context(), IntrospectionError::NotFound { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn same_pod_name_in_other_namespace_is_not_matched() {
        let source = StaticPodResources::new(vec![
            pod_resources("staging", "web", vec![container("nginx", vec![4])]),
            pod_resources("shop", "web", vec![container("nginx", vec![9, 8])]),
        ]);
        let introspector = ResourceIntrospector::new(source);

        let cpus = introspector.container_cpus("shop", "web", "nginx").await.unwrap();
        assert_eq!(cpus, vec!["8", "9"]);

        let err = introspector.container_cpus("prod", "web", "nginx").await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &IntrospectionError::NotFound {
                pod: "prod/web".to_string(),
                container: "nginx".to_string()
            }
        );
    }

    #[test_log::test(tokio::test)]
    async fn every_call_lists_again() {
        let source = StaticPodResources::new(vec![pod_resources(
            "shop",
            "web",
            vec![container("nginx", vec![1])],
        )]);
        let introspector = ResourceIntrospector::new(source.clone());

        introspector.container_cpus("shop", "web", "nginx").await.unwrap();
        source.replace(vec![pod_resources("shop", "web", vec![container("nginx", vec![7, 6])])]);
        let cpus = introspector.container_cpus("shop", "web", "nginx").await.unwrap();
        assert_eq!(cpus, vec!["6", "7"]);
        assert_eq!(source.list_calls(), 2);
    }
}
