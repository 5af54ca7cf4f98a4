//! Resolution errors.

use kubefan_core::KubeconfigError;
use thiserror::Error;

/// Errors that prevent building the target list. All of them are fatal to a run.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A named context could not be turned into a target.
    #[error("failed to get config for context {context:?}: {source}")]
    Context {
        context: String,
        #[source]
        source: KubeconfigError,
    },

    /// HTTP transport error talking to the hub.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The hub answered with a non-success status.
    #[error("hub returned HTTP {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The registry resource type is not served by the hub.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// The hub's exec credential plugin failed.
    #[error("exec credential plugin '{command}' failed: {reason}")]
    ExecPlugin { command: String, reason: String },

    /// A hub response could not be decoded.
    #[error("failed to decode hub response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A registry object declares no server address.
    #[error("cluster object {0:?} has no server endpoints")]
    NoServerEndpoint(String),
}
