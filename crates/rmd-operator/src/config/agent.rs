use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct AgentArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "HOSTNAME",
        help = "Name of this agent's own pod, used to find the node it runs on"
    )]
    pub pod_name: String,

    #[arg(
        long,
        default_value = "/var/lib/kubelet/pod-resources/kubelet.sock",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubelet pod-resources socket"
    )]
    pub pod_resources_socket: PathBuf,

    #[arg(
        long,
        env = "RMD_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_file: Option<PathBuf>,
}

/// Settings of the per-node agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub pod_name: String,
    pub pod_resources_socket: PathBuf,
}

impl From<&AgentArgs> for AgentConfig {
    fn from(args: &AgentArgs) -> Self {
        Self {
            pod_name: args.pod_name.clone(),
            pod_resources_socket: args.pod_resources_socket.clone(),
        }
    }
}
