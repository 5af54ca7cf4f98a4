//! Targets from an explicit list of kubeconfig contexts.

use async_trait::async_trait;
use kubefan_core::{ClusterTarget, Kubeconfig};
use tracing::debug;

use crate::error::ResolveError;
use crate::ClusterResolver;

/// Resolves an ordered list of context names against one kubeconfig.
pub struct ExplicitResolver {
    kubeconfig: Kubeconfig,
    contexts: Vec<String>,
}

impl ExplicitResolver {
    pub fn new(kubeconfig: Kubeconfig, contexts: Vec<String>) -> Self {
        Self {
            kubeconfig,
            contexts,
        }
    }

    /// Resolve synchronously. Targets come back in input order; the first
    /// unresolvable name aborts the whole resolution.
    pub fn resolve_all(&self) -> Result<Vec<ClusterTarget>, ResolveError> {
        self.contexts
            .iter()
            .map(|context| {
                debug!(context = %context, "Resolving context");
                self.kubeconfig
                    .resolve_context(context)
                    .map_err(|source| ResolveError::Context {
                        context: context.clone(),
                        source,
                    })
            })
            .collect()
    }
}

#[async_trait]
impl ClusterResolver for ExplicitResolver {
    async fn resolve(&self) -> Result<Vec<ClusterTarget>, ResolveError> {
        self.resolve_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
clusters:
- name: a
  cluster:
    server: https://a.example.com
- name: b
  cluster:
    server: https://b.example.com
users:
- name: admin
  user:
    token: secret
contexts:
- name: alpha
  context:
    cluster: a
    user: admin
- name: beta
  context:
    cluster: b
    user: admin
"#;

    fn resolver(contexts: &[&str]) -> ExplicitResolver {
        let kubeconfig = Kubeconfig::from_yaml(CONFIG, "test").unwrap();
        ExplicitResolver::new(kubeconfig, contexts.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn test_preserves_input_order() {
        let targets = resolver(&["beta", "alpha", "beta"]).resolve_all().unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["beta", "alpha", "beta"]);
        assert_eq!(targets[0].server(), "https://b.example.com");
    }

    #[test]
    fn test_fails_on_first_unknown_context() {
        let err = resolver(&["alpha", "gamma", "delta"])
            .resolve_all()
            .unwrap_err();
        match err {
            ResolveError::Context { context, .. } => assert_eq!(context, "gamma"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_list_resolves_to_no_targets() {
        let targets = resolver(&[]).resolve().await.unwrap();
        assert!(targets.is_empty());
    }
}
