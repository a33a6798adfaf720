use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use api_types::RmdNodeState;
use api_types::RmdWorkload;
use clap::Parser;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::Api;
use kube::Client;
use kube::CustomResourceExt;
use rmd_operator::config::AgentArgs;
use rmd_operator::config::AgentConfig;
use rmd_operator::config::Cli;
use rmd_operator::config::Commands;
use rmd_operator::config::OperatorArgs;
use rmd_operator::config::OperatorConfig;
use rmd_operator::controllers::node_labeler;
use rmd_operator::controllers::node_labeler::NodeLabelerContext;
use rmd_operator::controllers::node_state;
use rmd_operator::controllers::node_state::NodeStateContext;
use rmd_operator::controllers::pod;
use rmd_operator::controllers::pod::PodContext;
use rmd_operator::controllers::workload;
use rmd_operator::controllers::workload::WorkloadContext;
use rmd_operator::daemon::DaemonApi;
use rmd_operator::daemon::DaemonClient;
use rmd_operator::deriver::WorkloadDeriver;
use rmd_operator::introspection::KubeletPodResources;
use rmd_operator::introspection::ResourceIntrospector;
use rmd_operator::k8s::init_kube_client;
use rmd_operator::k8s::ClusterApi;
use rmd_operator::k8s::KubeCluster;
use rmd_operator::logging;
use rmd_operator::registry::NodeRegistry;
use rmd_operator::reporter::NodeStateReporter;
use rmd_operator::synchronizer::WorkloadSynchronizer;

/// Retry delay of the agent's pod controller.
const AGENT_REQUEUE: Duration = Duration::from_secs(5);

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Operator(args) => run_operator(*args).await,
        Commands::Agent(args) => run_agent(args).await,
        Commands::Crd => print_crds(),
    }
}

async fn run_operator(args: OperatorArgs) -> Result<()> {
    let _guard = logging::init(args.log_file.as_deref())?;
    let config = OperatorConfig::from(&args);
    tracing::info!(
        "Starting rmd-operator {} in namespace {}",
        env!("CARGO_PKG_VERSION"),
        config.namespace
    );

    let client = init_kube_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));
    let daemon: Arc<dyn DaemonApi> = Arc::new(daemon_client(&client, &config).await?);
    let registry = Arc::new(NodeRegistry::new());

    let workloads = Arc::new(WorkloadContext {
        client: client.clone(),
        cluster: cluster.clone(),
        synchronizer: WorkloadSynchronizer::new(daemon.clone(), cluster.clone(), registry.clone()),
        requeue: config.requeue,
    });
    let node_states = Arc::new(NodeStateContext {
        client: client.clone(),
        reporter: NodeStateReporter::new(daemon, cluster.clone(), registry),
        requeue: config.requeue,
    });
    let labeler = Arc::new(NodeLabelerContext {
        client,
        cluster,
        namespace: config.namespace.clone(),
        requeue: config.requeue,
    });

    tokio::join!(
        workload::run(workloads),
        node_state::run(node_states),
        node_labeler::run(labeler, &config.node_label_selector),
    );

    tracing::info!("rmd-operator stopped");
    Ok(())
}

/// TLS when the daemon DaemonSet listens on the TLS port, plaintext otherwise
/// or when the DaemonSet cannot be read.
async fn daemon_client(client: &Client, config: &OperatorConfig) -> Result<DaemonClient> {
    let daemon_sets: Api<DaemonSet> = Api::namespaced(client.clone(), &config.daemon_namespace);
    let daemon_set = match daemon_sets.get_opt(&config.daemon_name).await {
        Ok(daemon_set) => daemon_set,
        Err(e) => {
            tracing::warn!("Failed to read daemon DaemonSet: {e}");
            None
        }
    };

    let daemon = match daemon_set {
        Some(daemon_set) => DaemonClient::from_daemon_set(&daemon_set, &config.tls),
        None => {
            tracing::warn!(
                namespace = %config.daemon_namespace,
                name = %config.daemon_name,
                "Daemon DaemonSet not found, using plaintext"
            );
            DaemonClient::plain()
        }
    };
    daemon.map_err(|e| anyhow::anyhow!("{e:?}"))
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let _guard = logging::init(args.log_file.as_deref())?;
    let config = AgentConfig::from(&args);
    tracing::info!(
        "Starting rmd-operator agent {} as pod {}",
        env!("CARGO_PKG_VERSION"),
        config.pod_name
    );

    let client = init_kube_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let source = KubeletPodResources::new(config.pod_resources_socket);

    let ctx = Arc::new(PodContext {
        client: client.clone(),
        cluster: Arc::new(KubeCluster::new(client)),
        deriver: WorkloadDeriver::new(ResourceIntrospector::new(source)),
        agent_pod: config.pod_name,
        requeue: AGENT_REQUEUE,
    });
    pod::run(ctx).await;

    tracing::info!("rmd-operator agent stopped");
    Ok(())
}

fn print_crds() -> Result<()> {
    let workload = serde_yaml::to_string(&RmdWorkload::crd()).context("serializing RmdWorkload CRD")?;
    let node_state =
        serde_yaml::to_string(&RmdNodeState::crd()).context("serializing RmdNodeState CRD")?;
    print!("{workload}---\n{node_state}");
    Ok(())
}
