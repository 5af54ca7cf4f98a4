//! Error taxonomy for runs.
//!
//! Per-target failures never abort sibling targets. They are collected as
//! [`ErrorRecord`]s and surfaced together as one [`RunFailure`].

use std::fmt;

use kubefan_core::KubeconfigError;
use thiserror::Error;

use crate::executor::Completion;

/// Materializing a target's credential bundle failed.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to render kubeconfig: {0}")]
    Render(#[from] KubeconfigError),

    #[error("failed to create temporary file: {0}")]
    Create(#[source] std::io::Error),

    #[error("failed to write kubeconfig: {0}")]
    Write(#[source] std::io::Error),
}

/// The command could not be run to completion.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start command {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read output of command {program:?}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why one target's task failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to convert target to kubeconfig: {0}")]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("failed to run command {program:?}: {completion}")]
    Failed {
        program: String,
        completion: Completion,
    },

    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),
}

/// Cause carried by an [`ErrorRecord`].
#[derive(Debug, Error)]
pub enum ErrorCause {
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The task panicked. The payload message is kept when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Synthetic record added when the run was cancelled.
    #[error("interrupted")]
    Interrupted,
}

/// One failure, tagged with the target it belongs to.
///
/// Records produced by the runner itself (interruption) carry no target.
#[derive(Debug)]
pub struct ErrorRecord {
    pub target: Option<String>,
    pub cause: ErrorCause,
}

impl ErrorRecord {
    pub fn new(target: impl Into<String>, cause: impl Into<ErrorCause>) -> Self {
        Self {
            target: Some(target.into()),
            cause: cause.into(),
        }
    }

    pub fn interrupted() -> Self {
        Self {
            target: None,
            cause: ErrorCause::Interrupted,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.cause, ErrorCause::Interrupted)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "[cluster {:>3}]: {}", target, self.cause),
            None => write!(f, "{}", self.cause),
        }
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Aggregate of every failure in a run. Never empty.
#[derive(Debug)]
pub struct RunFailure {
    errors: Vec<ErrorRecord>,
}

impl RunFailure {
    /// Returns `None` for an empty list, since an empty aggregate means success.
    pub fn from_records(errors: Vec<ErrorRecord>) -> Option<Self> {
        (!errors.is_empty()).then_some(Self { errors })
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn was_interrupted(&self) -> bool {
        self.errors.iter().any(ErrorRecord::is_interrupted)
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "failed to run ({} errors):", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            writeln!(f, "[error {:>3}]: {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for RunFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_display() {
        let record = ErrorRecord::new(
            "ab",
            TaskError::Failed {
                program: "kubectl".to_string(),
                completion: Completion::Exited(2),
            },
        );
        assert_eq!(
            record.to_string(),
            "[cluster  ab]: failed to run command \"kubectl\": exited with code 2"
        );
        assert_eq!(ErrorRecord::interrupted().to_string(), "interrupted");
    }

    #[test]
    fn test_failure_numbered_list() {
        let failure = RunFailure::from_records(vec![
            ErrorRecord::new("east", ErrorCause::Panicked("boom".to_string())),
            ErrorRecord::interrupted(),
        ])
        .unwrap();

        assert_eq!(failure.len(), 2);
        assert!(failure.was_interrupted());
        assert_eq!(
            failure.to_string(),
            "failed to run (2 errors):\n\
             [error   1]: [cluster east]: task panicked: boom\n\
             [error   2]: interrupted\n"
        );
    }

    #[test]
    fn test_empty_records_are_success() {
        assert!(RunFailure::from_records(Vec::new()).is_none());
    }
}
