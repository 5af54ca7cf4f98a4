//! kubefan Core Domain Types
//!
//! This crate contains the types shared by the resolvers and the runner:
//! - Resolved cluster identities (`ClusterTarget`)
//! - The kubeconfig file model, with loading, merging and writing
//!
//! Nothing here talks to the network or spawns processes.

pub mod error;
pub mod kubeconfig;
pub mod target;

// Re-export commonly used types
pub use error::KubeconfigError;
pub use kubeconfig::Kubeconfig;
pub use target::{ensure_https, AuthMaterial, ClusterTarget, ExecConfig, ExecEnvVar, TlsSettings};
