//! Command fan-out across clusters.
//!
//! The [`Runner`] drives one [`TargetTask`] per [`ClusterTarget`] through a
//! fixed pool of workers and folds every failure into one aggregate. The
//! stock task, [`ClusterTask`], materializes a kubeconfig for the target,
//! runs an external command against it and routes the captured output
//! through a shared [`OutputMultiplexer`].
//!
//! [`ClusterTarget`]: kubefan_core::ClusterTarget

mod credentials;
mod error;
mod executor;
mod output;
mod runner;
mod task;

pub use credentials::{CredentialBundle, CredentialMaterializer, KubeconfigMaterializer};
pub use error::{CredentialError, ErrorCause, ErrorRecord, ExecError, RunFailure, TaskError};
pub use executor::{CommandExecutor, CommandOutput, Completion, Invocation, ProcessExecutor};
pub use output::{OutputMode, OutputMultiplexer, LABEL_WIDTH, PALETTE};
pub use runner::{RunOutcome, Runner, TargetTask};
pub use task::{ClusterTask, CommandSpec, COMMAND_TIMEOUT, CREDENTIAL_ENV};
