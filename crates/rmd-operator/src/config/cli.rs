use clap::Parser;
use clap::Subcommand;

use crate::config::agent::AgentArgs;
use crate::config::operator::OperatorArgs;

#[derive(Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the workload synchronizer, node-state reporter and node labeler
    Operator(Box<OperatorArgs>),
    /// Run the per-node agent deriving workloads from pods
    Agent(AgentArgs),
    /// Print the custom resource definitions as YAML
    Crd,
}
