//! Run configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kubefan_runner::{CommandSpec, OutputMode, COMMAND_TIMEOUT, CREDENTIAL_ENV};
use thiserror::Error;

use crate::cli::RunArgs;

/// Registry namespace searched when none is given.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Invalid command line, reported before any cluster is contacted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("command is required")]
    MissingCommand,

    #[error("one of --context, --context-file or --cr-context is required")]
    NoTargets,

    #[error("--context/--context-file and --cr-context are mutually exclusive")]
    ConflictingTargets,

    #[error("--workers must be at least 1")]
    ZeroWorkers,

    #[error("--timeout must be at least 1 second")]
    ZeroTimeout,

    #[error("failed to read context-file {path}: {source}")]
    ContextFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How the targets of a run are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targeting {
    /// Named contexts from the kubeconfig, in order.
    Explicit { contexts: Vec<String> },

    /// Cluster objects listed from a registry on a hub cluster.
    Registry {
        context: String,
        namespace: String,
        selector: Option<String>,
        name_label: Option<String>,
    },
}

/// Everything needed to perform one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Explicit kubeconfig path. `None` falls back to `$KUBECONFIG`, then `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,

    pub targeting: Targeting,

    /// Maximum number of clusters processed at once.
    pub workers: usize,

    pub output: OutputMode,

    pub program: String,
    pub args: Vec<String>,

    /// Deadline for each command.
    pub timeout: Duration,

    /// Variable the command reads its kubeconfig path from.
    pub credential_env: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            targeting: Targeting::Explicit {
                contexts: Vec::new(),
            },
            workers: 1,
            output: OutputMode::default(),
            program: String::new(),
            args: Vec::new(),
            timeout: COMMAND_TIMEOUT,
            credential_env: CREDENTIAL_ENV.to_string(),
        }
    }
}

impl RunConfig {
    /// Build and validate a configuration from parsed arguments.
    pub fn from_args(args: RunArgs) -> Result<Self, ConfigError> {
        if args.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if args.timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let mut command = args.command.into_iter();
        let program = command
            .next()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingCommand)?;

        let mut contexts = args.contexts;
        if let Some(path) = &args.context_file {
            contexts = read_context_file(path)?;
        }
        let cr_context = args.cr_context.filter(|c| !c.is_empty());

        let targeting = match (contexts.is_empty(), cr_context) {
            (false, Some(_)) => return Err(ConfigError::ConflictingTargets),
            (false, None) => Targeting::Explicit { contexts },
            (true, Some(context)) => Targeting::Registry {
                context,
                namespace: args
                    .cr_namespace
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                selector: args.selector.filter(|s| !s.is_empty()),
                name_label: args.cr_label.filter(|l| !l.is_empty()),
            },
            (true, None) => return Err(ConfigError::NoTargets),
        };

        Ok(Self {
            kubeconfig: args.kubeconfig,
            targeting,
            workers: args.workers,
            output: args.output,
            program,
            args: command.collect(),
            timeout: Duration::from_secs(args.timeout),
            ..Default::default()
        })
    }

    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(self.program.clone(), self.args.clone())
            .with_timeout(self.timeout)
            .with_credential_env(self.credential_env.clone())
    }
}

/// Read context names from a file, one per line.
///
/// Surrounding whitespace is trimmed; blank lines and `#` comments are skipped.
pub fn read_context_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ContextFile {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
