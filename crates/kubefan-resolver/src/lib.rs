//! Cluster target resolution for kubefan.
//!
//! A resolver turns a targeting specification into the list of
//! [`ClusterTarget`]s a run will fan out over:
//!
//! - [`ExplicitResolver`] looks up named kubeconfig contexts.
//! - [`RegistryResolver`] lists `Cluster` objects from a cluster registry
//!   running on a hub cluster and derives one target per object.

mod client;
mod error;
mod explicit;
mod registry;

use async_trait::async_trait;
use kubefan_core::ClusterTarget;

pub use client::{ApiResource, HubClient};
pub use error::ResolveError;
pub use explicit::ExplicitResolver;
pub use registry::{
    derive_target, ClusterSpec, KubernetesApiEndpoints, NameSource, ObjectMeta, RegistryCluster,
    RegistryResolver, ServerEndpoint, REGISTRY_GROUP, REGISTRY_KIND,
};

/// Produces the targets for one run.
///
/// Resolution is all-or-nothing: either every target is returned or an error
/// is, never a partial list.
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    async fn resolve(&self) -> Result<Vec<ClusterTarget>, ResolveError>;
}
