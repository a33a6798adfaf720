use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::consts::DEFAULT_CA_PATH;
use crate::consts::DEFAULT_CERT_PATH;
use crate::consts::DEFAULT_KEY_PATH;
use crate::consts::DEFAULT_NAMESPACE;
use crate::daemon::TlsPaths;

#[derive(Parser, Clone, Debug)]
pub struct OperatorArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "RMD_NAMESPACE",
        default_value = DEFAULT_NAMESPACE,
        help = "Namespace in which node states are created"
    )]
    pub namespace: String,

    #[arg(
        long,
        default_value = "intel.com/rmd-node=true",
        help = "Label selector marking nodes eligible for the daemon"
    )]
    pub node_label: String,

    #[arg(
        long,
        env = "RMD_DAEMON_NAMESPACE",
        default_value = DEFAULT_NAMESPACE,
        help = "Namespace of the daemon DaemonSet"
    )]
    pub daemon_namespace: String,

    #[arg(
        long,
        default_value = "rmd",
        help = "Name of the daemon DaemonSet, inspected to choose TLS or plaintext"
    )]
    pub daemon_name: String,

    #[arg(
        long,
        default_value = DEFAULT_CERT_PATH,
        value_hint = clap::ValueHint::FilePath,
        help = "Client certificate presented to the daemon"
    )]
    pub tls_cert: PathBuf,

    #[arg(
        long,
        default_value = DEFAULT_KEY_PATH,
        value_hint = clap::ValueHint::FilePath,
        help = "Private key of the client certificate"
    )]
    pub tls_key: PathBuf,

    #[arg(
        long,
        default_value = DEFAULT_CA_PATH,
        value_hint = clap::ValueHint::FilePath,
        help = "CA bundle the daemon's certificate must chain to"
    )]
    pub tls_ca: PathBuf,

    #[arg(
        long,
        default_value = "5",
        help = "Seconds between node state polls and between retries of failed reconciliations"
    )]
    pub requeue_secs: u64,

    #[arg(
        long,
        env = "RMD_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_file: Option<PathBuf>,
}

/// Settings the operator's controllers run with.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub namespace: String,
    pub node_label_selector: String,
    pub daemon_namespace: String,
    pub daemon_name: String,
    pub tls: TlsPaths,
    pub requeue: Duration,
}

impl From<&OperatorArgs> for OperatorConfig {
    fn from(args: &OperatorArgs) -> Self {
        Self {
            namespace: args.namespace.clone(),
            node_label_selector: args.node_label.clone(),
            daemon_namespace: args.daemon_namespace.clone(),
            daemon_name: args.daemon_name.clone(),
            tls: TlsPaths {
                cert: args.tls_cert.clone(),
                key: args.tls_key.clone(),
                ca: args.tls_ca.clone(),
            },
            requeue: Duration::from_secs(args.requeue_secs.max(1)),
        }
    }
}
