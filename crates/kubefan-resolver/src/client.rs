//! HTTP client for the hub cluster's API server.

use std::process::Stdio;
use std::time::Duration;

use kubefan_core::{AuthMaterial, ClusterTarget, ExecConfig};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ResolveError;

/// A resolved API resource: where objects of a kind are served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResource {
    /// `group/version` the resource was discovered under.
    pub group_version: String,

    /// Plural resource name used in URLs.
    pub plural: String,

    pub namespaced: bool,
}

impl ApiResource {
    /// Collection path for list requests.
    pub fn list_path(&self, namespace: &str) -> String {
        if self.namespaced {
            format!(
                "/apis/{}/namespaces/{}/{}",
                self.group_version, namespace, self.plural
            )
        } else {
            format!("/apis/{}/{}", self.group_version, self.plural)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGroup {
    #[serde(default)]
    preferred_version: Option<GroupVersionForDiscovery>,
    #[serde(default)]
    versions: Vec<GroupVersionForDiscovery>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupVersionForDiscovery {
    group_version: String,
}

#[derive(Debug, Deserialize)]
struct ApiResourceList {
    #[serde(default)]
    resources: Vec<ApiResourceEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiResourceEntry {
    name: String,
    kind: String,
    #[serde(default)]
    namespaced: bool,
}

#[derive(Debug, Deserialize)]
struct ExecCredential {
    #[serde(default)]
    status: Option<ExecCredentialStatus>,
}

#[derive(Debug, Deserialize)]
struct ExecCredentialStatus {
    #[serde(default)]
    token: Option<String>,
}

/// Client for the hub's REST API, authenticated with the hub target's credentials.
pub struct HubClient {
    inner: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HubClient {
    /// Build a client for `hub`. Exec credentials are exchanged for a token here.
    pub async fn connect(hub: &ClusterTarget, timeout: Duration) -> Result<Self, ResolveError> {
        let tls = hub.tls();
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(tls.insecure_skip_verify);
        if let Some(ca) = &tls.ca_data {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(ca)?);
        }

        let token = match hub.auth() {
            AuthMaterial::Token(token) => Some(token.clone()),
            AuthMaterial::Exec(exec) => Some(exec_token(exec).await?),
            AuthMaterial::ClientCertificate { cert, key } => {
                let mut pem = cert.clone();
                if !pem.ends_with(b"\n") {
                    pem.push(b'\n');
                }
                pem.extend_from_slice(key);
                builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
                None
            }
            AuthMaterial::Anonymous => None,
        };

        info!(hub = %hub.name(), server = %hub.server(), "Connecting to cluster registry hub");

        Ok(Self {
            inner: builder.build()?,
            base_url: hub.server().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// GET a JSON document from the hub.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ResolveError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET request");

        let mut request = self
            .inner
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(query);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ResolveError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Find the resource serving `kind` in `group`, using the group's preferred version.
    pub async fn discover(&self, group: &str, kind: &str) -> Result<ApiResource, ResolveError> {
        let api_group: ApiGroup = self.get_json(&format!("/apis/{}", group), &[]).await?;
        let group_version = api_group
            .preferred_version
            .or_else(|| api_group.versions.into_iter().next())
            .map(|v| v.group_version)
            .ok_or_else(|| ResolveError::Discovery(format!("group {} serves no versions", group)))?;

        let list: ApiResourceList = self
            .get_json(&format!("/apis/{}", group_version), &[])
            .await?;
        let entry = list
            .resources
            .into_iter()
            .find(|r| r.kind == kind && !r.name.contains('/'))
            .ok_or_else(|| {
                ResolveError::Discovery(format!("no resource of kind {} in {}", kind, group_version))
            })?;

        debug!(group_version = %group_version, resource = %entry.name, "Discovered resource");

        Ok(ApiResource {
            group_version,
            plural: entry.name,
            namespaced: entry.namespaced,
        })
    }
}

/// Run an exec credential plugin and return the bearer token it prints.
async fn exec_token(exec: &ExecConfig) -> Result<String, ResolveError> {
    let plugin_error = |reason: String| ResolveError::ExecPlugin {
        command: exec.command.clone(),
        reason,
    };

    let exec_info = serde_json::json!({
        "apiVersion": exec.api_version,
        "kind": "ExecCredential",
        "spec": { "interactive": false },
    });

    let mut cmd = Command::new(&exec.command);
    cmd.args(exec.args.iter().flatten())
        .env("KUBERNETES_EXEC_INFO", exec_info.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for var in exec.env.iter().flatten() {
        cmd.env(&var.name, &var.value);
    }

    debug!(command = %exec.command, "Running exec credential plugin");
    let output = cmd.output().await.map_err(|e| plugin_error(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(plugin_error(format!(
            "exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let credential: ExecCredential = serde_json::from_slice(&output.stdout)?;
    credential
        .status
        .and_then(|s| s.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| plugin_error("credential has no status.token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_path() {
        let namespaced = ApiResource {
            group_version: "clusterregistry.k8s.io/v1alpha1".to_string(),
            plural: "clusters".to_string(),
            namespaced: true,
        };
        assert_eq!(
            namespaced.list_path("default"),
            "/apis/clusterregistry.k8s.io/v1alpha1/namespaces/default/clusters"
        );

        let cluster_scoped = ApiResource {
            namespaced: false,
            ..namespaced
        };
        assert_eq!(
            cluster_scoped.list_path("default"),
            "/apis/clusterregistry.k8s.io/v1alpha1/clusters"
        );
    }

    #[tokio::test]
    async fn test_client_certificate_is_not_dropped() {
        // Unusable certificate material must fail the connection instead of
        // falling back to an unauthenticated client.
        let hub = ClusterTarget::new(
            "hub",
            "https://hub.example.com",
            AuthMaterial::ClientCertificate {
                cert: b"not a certificate".to_vec(),
                key: b"not a key".to_vec(),
            },
        );

        let result = HubClient::connect(&hub, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ResolveError::Http(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_token_from_plugin() {
        let exec = ExecConfig {
            api_version: "client.authentication.k8s.io/v1beta1".to_string(),
            command: "sh".to_string(),
            args: Some(vec![
                "-c".to_string(),
                r#"echo '{"kind":"ExecCredential","status":{"token":"plugin-token"}}'"#.to_string(),
            ]),
            ..Default::default()
        };

        assert_eq!(exec_token(&exec).await.unwrap(), "plugin-token");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_token_plugin_failure() {
        let exec = ExecConfig {
            command: "sh".to_string(),
            args: Some(vec!["-c".to_string(), "echo denied >&2; exit 3".to_string()]),
            ..Default::default()
        };

        let err = exec_token(&exec).await.unwrap_err();
        assert!(matches!(err, ResolveError::ExecPlugin { .. }));
        assert!(err.to_string().contains("denied"));
    }
}
