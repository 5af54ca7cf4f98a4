//! Targets discovered from a cluster registry.
//!
//! The hub cluster serves `Cluster` objects (group `clusterregistry.k8s.io`).
//! Every object matching the label selector becomes a target that reuses the
//! hub's credentials against the object's first server address.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use kubefan_core::{ensure_https, ClusterTarget, Kubeconfig, TlsSettings};
use serde::Deserialize;
use tracing::{info, warn};

use crate::client::HubClient;
use crate::error::ResolveError;
use crate::ClusterResolver;

pub const REGISTRY_GROUP: &str = "clusterregistry.k8s.io";
pub const REGISTRY_KIND: &str = "Cluster";

/// Default timeout for hub requests.
const HUB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A `Cluster` object as listed from the registry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryCluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub kubernetes_api_endpoints: KubernetesApiEndpoints,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApiEndpoints {
    #[serde(default)]
    pub server_endpoints: Vec<ServerEndpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEndpoint {
    #[serde(default)]
    pub server_address: String,
}

#[derive(Debug, Deserialize)]
struct RegistryClusterList {
    #[serde(default)]
    items: Vec<RegistryCluster>,
}

impl RegistryCluster {
    fn first_server(&self) -> Option<&str> {
        self.spec
            .kubernetes_api_endpoints
            .server_endpoints
            .first()
            .map(|e| e.server_address.as_str())
            .filter(|addr| !addr.is_empty())
    }
}

/// How a registry object's display name is derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NameSource {
    /// The object's own `metadata.name`.
    #[default]
    ObjectName,
    /// The value of this label. Objects lacking it fall back to their name.
    Label(String),
}

impl NameSource {
    pub fn display_name(&self, cluster: &RegistryCluster) -> String {
        match self {
            Self::ObjectName => cluster.metadata.name.clone(),
            Self::Label(key) => match cluster.metadata.labels.get(key) {
                Some(value) => value.clone(),
                None => {
                    warn!(
                        object = %cluster.metadata.name,
                        label = %key,
                        "Cluster object lacks name label, using object name"
                    );
                    cluster.metadata.name.clone()
                }
            },
        }
    }
}

/// Build the target for one registry object from the hub target.
///
/// The hub's authentication material is cloned verbatim; only the endpoint
/// changes. Certificate verification is turned off and any CA is dropped for
/// derived endpoints, since the registry carries no CA for its clusters.
pub fn derive_target(
    hub: &ClusterTarget,
    cluster: &RegistryCluster,
    name: String,
) -> Result<ClusterTarget, ResolveError> {
    let server = cluster
        .first_server()
        .ok_or_else(|| ResolveError::NoServerEndpoint(cluster.metadata.name.clone()))?;

    Ok(ClusterTarget::new(name, ensure_https(server), hub.auth().clone())
        .with_tls(TlsSettings::insecure()))
}

/// Discovers targets by listing registry objects on a hub cluster.
pub struct RegistryResolver {
    kubeconfig: Kubeconfig,
    hub_context: String,
    namespace: String,
    selector: Option<String>,
    name_source: NameSource,
    timeout: Duration,
}

impl RegistryResolver {
    pub fn new(kubeconfig: Kubeconfig, hub_context: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kubeconfig,
            hub_context: hub_context.into(),
            namespace: namespace.into(),
            selector: None,
            name_source: NameSource::default(),
            timeout: HUB_TIMEOUT,
        }
    }

    /// Builder method to set the label selector. An empty selector matches everything.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        self.selector = (!selector.is_empty()).then_some(selector);
        self
    }

    pub fn with_name_source(mut self, name_source: NameSource) -> Self {
        self.name_source = name_source;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True when no selector narrows the listing.
    pub fn is_unbounded(&self) -> bool {
        self.selector.is_none()
    }
}

#[async_trait]
impl ClusterResolver for RegistryResolver {
    async fn resolve(&self) -> Result<Vec<ClusterTarget>, ResolveError> {
        let hub = self
            .kubeconfig
            .resolve_context(&self.hub_context)
            .map_err(|source| ResolveError::Context {
                context: self.hub_context.clone(),
                source,
            })?;

        if self.is_unbounded() {
            warn!(
                namespace = %self.namespace,
                "Running without a selector, every registered cluster is a target"
            );
        }

        let client = HubClient::connect(&hub, self.timeout).await?;
        let resource = client.discover(REGISTRY_GROUP, REGISTRY_KIND).await?;

        let mut query = Vec::new();
        if let Some(selector) = &self.selector {
            query.push(("labelSelector", selector.as_str()));
        }
        let list: RegistryClusterList = client
            .get_json(&resource.list_path(&self.namespace), &query)
            .await?;

        info!(
            namespace = %self.namespace,
            selector = self.selector.as_deref().unwrap_or(""),
            count = list.items.len(),
            "Listed registry clusters"
        );

        list.items
            .iter()
            .map(|cluster| derive_target(&hub, cluster, self.name_source.display_name(cluster)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefan_core::AuthMaterial;

    fn cluster(name: &str, labels: &[(&str, &str)], servers: &[&str]) -> RegistryCluster {
        let json = serde_json::json!({
            "metadata": {
                "name": name,
                "labels": labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>(),
            },
            "spec": {
                "kubernetesApiEndpoints": {
                    "serverEndpoints": servers.iter().map(|s| serde_json::json!({"serverAddress": s})).collect::<Vec<_>>(),
                }
            }
        });
        serde_json::from_value(json).unwrap()
    }

    fn hub() -> ClusterTarget {
        ClusterTarget::new("hub", "https://hub", AuthMaterial::Token("hub-token".into())).with_tls(
            TlsSettings {
                ca_data: Some(b"hub-ca".to_vec()),
                insecure_skip_verify: false,
            },
        )
    }

    #[test]
    fn test_derive_target_reuses_hub_auth() {
        let object = cluster("east", &[], &["10.1.0.1:6443", "10.1.0.2:6443"]);
        let target = derive_target(&hub(), &object, "east".to_string()).unwrap();

        assert_eq!(target.server(), "https://10.1.0.1:6443");
        assert_eq!(target.auth(), hub().auth());
        assert!(target.tls().insecure_skip_verify);
        assert!(target.tls().ca_data.is_none());
    }

    #[test]
    fn test_derive_target_without_endpoint() {
        let object = cluster("bare", &[], &[]);
        let err = derive_target(&hub(), &object, "bare".to_string()).unwrap_err();
        assert!(matches!(err, ResolveError::NoServerEndpoint(name) if name == "bare"));
    }

    #[test]
    fn test_name_source() {
        let object = cluster("obj-1", &[("short-name", "east")], &["a"]);
        assert_eq!(NameSource::ObjectName.display_name(&object), "obj-1");
        assert_eq!(
            NameSource::Label("short-name".into()).display_name(&object),
            "east"
        );
        assert_eq!(
            NameSource::Label("missing".into()).display_name(&object),
            "obj-1"
        );
    }

    #[test]
    fn test_empty_selector_is_unbounded() {
        let resolver = RegistryResolver::new(Kubeconfig::default(), "hub", "default");
        assert!(resolver.is_unbounded());
        assert!(resolver.with_selector("").is_unbounded());

        let resolver = RegistryResolver::new(Kubeconfig::default(), "hub", "default")
            .with_selector("env=prod");
        assert!(!resolver.is_unbounded());
    }
}
