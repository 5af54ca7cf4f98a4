//! Command line definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kubefan_runner::OutputMode;

/// kubefan - Multi-cluster operations
#[derive(Parser, Debug)]
#[command(name = "kubefan", version)]
#[command(about = "Run a command against many Kubernetes clusters", long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run command against given clusters
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to kubeconfig (default: $KUBECONFIG, then ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Context from kubeconfig (can be repeated)
    #[arg(short = 'c', long = "context", value_name = "NAME")]
    pub contexts: Vec<String>,

    /// File containing contexts, one per line
    #[arg(long, value_name = "PATH", conflicts_with = "contexts")]
    pub context_file: Option<PathBuf>,

    /// Context from kubeconfig pointing to the cluster registry
    #[arg(long, value_name = "NAME")]
    pub cr_context: Option<String>,

    /// Namespace within the cluster registry to search for clusters [default: default]
    #[arg(long, value_name = "NAMESPACE", requires = "cr_context")]
    pub cr_namespace: Option<String>,

    /// Label on cluster objects to use as the target name
    #[arg(long, value_name = "KEY", requires = "cr_context")]
    pub cr_label: Option<String>,

    /// Label selector for the cluster registry
    #[arg(short = 'l', long, value_name = "SELECTOR", requires = "cr_context")]
    pub selector: Option<String>,

    /// Level of parallelism
    #[arg(short, long, default_value_t = 1)]
    pub workers: usize,

    /// Output type (one of plain,color,prefix,none)
    #[arg(short, long, default_value_t = OutputMode::Color)]
    pub output: OutputMode,

    /// Per-cluster command timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub timeout: u64,

    /// Command to run, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}
