use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use super::ClusterError;

/// Connect to the API server, from `kubeconfig` when given, otherwise from the
/// in-cluster environment or `~/.kube/config`.
pub async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, Report<ClusterError>> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .change_context(ClusterError::ConnectionFailed {
                message: "Failed to create Kubernetes client".to_string(),
            });
    };

    let kubeconfig =
        Kubeconfig::read_from(path).change_context_lazy(|| ClusterError::ConnectionFailed {
            message: format!("Failed to read kubeconfig file: {}", path.display()),
        })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(|| ClusterError::ConnectionFailed {
            message: format!("Failed to create config from kubeconfig: {}", path.display()),
        })?;

    Client::try_from(config).change_context(ClusterError::ConnectionFailed {
        message: "Failed to create Kubernetes client from custom kubeconfig".to_string(),
    })
}
