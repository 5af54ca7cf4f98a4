//! Core domain errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading a kubeconfig or resolving one of its contexts.
#[derive(Debug, Error)]
pub enum KubeconfigError {
    /// No kubeconfig file could be located.
    #[error("No kubeconfig found (checked --kubeconfig, $KUBECONFIG and ~/.kube/config)")]
    NotFound,

    /// A kubeconfig or a file it references could not be read.
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A kubeconfig file is not valid YAML for the expected schema.
    #[error("Failed to parse kubeconfig '{origin}': {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A kubeconfig could not be serialized.
    #[error("Failed to serialize kubeconfig: {0}")]
    Serialize(#[source] serde_yaml::Error),

    /// An empty context name was requested and no current-context is set.
    #[error("No context given and kubeconfig has no current-context")]
    NoCurrentContext,

    /// Context not found.
    #[error("Context not found: {0}")]
    ContextNotFound(String),

    /// A context references a cluster entry that does not exist.
    #[error("Context '{context}' references unknown cluster '{cluster}'")]
    ClusterNotFound { context: String, cluster: String },

    /// A context references a user entry that does not exist.
    #[error("Context '{context}' references unknown user '{user}'")]
    UserNotFound { context: String, user: String },

    /// A cluster entry has no server address.
    #[error("Cluster '{0}' has no server address")]
    MissingServer(String),

    /// A user sets only one half of a client certificate pair.
    #[error("User '{0}' needs both a client certificate and a client key")]
    IncompleteClientCertificate(String),

    /// client-certificate-data or client-key-data is not valid base64.
    #[error("User '{user}' has invalid {field}: {source}")]
    InvalidUserData {
        user: String,
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// certificate-authority-data is not valid base64.
    #[error("Cluster '{cluster}' has invalid certificate-authority-data: {source}")]
    InvalidCaData {
        cluster: String,
        #[source]
        source: base64::DecodeError,
    },
}
