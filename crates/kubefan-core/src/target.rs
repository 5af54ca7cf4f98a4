//! Resolved cluster identities.

use serde::{Deserialize, Serialize};

/// Resolved identity of one remote cluster: display name, API endpoint and
/// the material needed to authenticate against it.
///
/// Targets are immutable once resolved. A target is handed to exactly one
/// task and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    name: String,
    server: String,
    auth: AuthMaterial,
    tls: TlsSettings,
}

impl ClusterTarget {
    /// Create a new target with default (verifying) TLS settings.
    pub fn new(name: impl Into<String>, server: impl Into<String>, auth: AuthMaterial) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            auth,
            tls: TlsSettings::default(),
        }
    }

    /// Builder method to set TLS settings.
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Display name used for output prefixes and error records.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// API server address.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn auth(&self) -> &AuthMaterial {
        &self.auth
    }

    pub fn tls(&self) -> &TlsSettings {
        &self.tls
    }
}

/// Authentication material carried by a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthMaterial {
    /// Static bearer token.
    Token(String),
    /// Delegated to an external credential plugin.
    Exec(ExecConfig),
    /// TLS client certificate and private key, both PEM.
    ClientCertificate { cert: Vec<u8>, key: Vec<u8> },
    /// No credentials.
    #[default]
    Anonymous,
}

impl AuthMaterial {
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Self::Token(token) => Some(token),
            _ => None,
        }
    }
}

/// TLS settings used to reach a cluster endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM-encoded CA bundle.
    pub ca_data: Option<Vec<u8>>,

    /// Skip server certificate verification.
    pub insecure_skip_verify: bool,
}

impl TlsSettings {
    /// Settings that accept any server certificate and carry no CA.
    pub fn insecure() -> Self {
        Self {
            ca_data: None,
            insecure_skip_verify: true,
        }
    }
}

/// External credential plugin description, kept in kubeconfig form so it can
/// be written back out verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    #[serde(default)]
    pub api_version: String,

    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<ExecEnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_mode: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub provide_cluster_info: bool,
}

/// Environment variable passed to an exec credential plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEnvVar {
    pub name: String,
    pub value: String,
}

/// Prefix `server` with `https://` unless it already carries that scheme.
pub fn ensure_https(server: &str) -> String {
    if server.starts_with("https://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    }
}
