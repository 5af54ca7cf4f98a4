//! kubefan - run one command against many Kubernetes clusters.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kubefan_core::{Kubeconfig, KubeconfigError};
use kubefan_resolver::{ClusterResolver, ExplicitResolver, NameSource, RegistryResolver, ResolveError};
use kubefan_runner::{
    ClusterTask, KubeconfigMaterializer, OutputMultiplexer, ProcessExecutor, RunFailure, Runner,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;

use cli::{Cli, Commands};
use config::{ConfigError, RunConfig, Targeting};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("failed to get cluster targets: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Run(#[from] RunFailure),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => match RunConfig::from_args(args) {
            Ok(config) => run(config).await,
            Err(e) => Err(e.into()),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Run(failure)) => {
            eprint!("{}", failure);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize logging: {}", e);
    }
}

async fn run(config: RunConfig) -> Result<(), CliError> {
    let kubeconfig = Kubeconfig::load(config.kubeconfig.as_deref())?;

    let resolver: Box<dyn ClusterResolver> = match &config.targeting {
        Targeting::Explicit { contexts } => {
            Box::new(ExplicitResolver::new(kubeconfig, contexts.clone()))
        }
        Targeting::Registry {
            context,
            namespace,
            selector,
            name_label,
        } => {
            let mut resolver = RegistryResolver::new(kubeconfig, context.clone(), namespace.clone());
            if let Some(selector) = selector {
                resolver = resolver.with_selector(selector.clone());
            }
            if let Some(label) = name_label {
                resolver = resolver.with_name_source(NameSource::Label(label.clone()));
            }
            Box::new(resolver)
        }
    };

    let targets = resolver.resolve().await?;
    info!("processing {} context(s)", targets.len());

    let task = ClusterTask::new(
        config.command(),
        Arc::new(KubeconfigMaterializer::new()),
        Arc::new(ProcessExecutor::new()),
        Arc::new(OutputMultiplexer::stdout(config.output)),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let outcome = Runner::new(config.workers)
        .run(targets, cancel, Arc::new(task))
        .await;
    if outcome.skipped > 0 {
        warn!(skipped = outcome.skipped, "Some clusters were never processed");
    }

    outcome.into_result().map_err(CliError::Run)
}

/// Cancel `token` on the first SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("got signal to shut down");
    token.cancel();
}
