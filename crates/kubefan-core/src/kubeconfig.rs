//! Kubeconfig file model.
//!
//! Only the fields kubefan reads or writes are modelled. Loading follows the
//! usual precedence: an explicit path, then `$KUBECONFIG` (several files,
//! merged), then `~/.kube/config`.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KubeconfigError;
use crate::target::{AuthMaterial, ClusterTarget, ExecConfig, TlsSettings};

/// Cluster entry name used in generated single-target kubeconfigs.
pub const GENERATED_CLUSTER: &str = "defaultCluster";

/// User entry name used in generated single-target kubeconfigs.
pub const GENERATED_USER: &str = "defaultAuthInfo";

/// A parsed kubeconfig document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedCluster>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedUser>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedContext>,

    #[serde(rename = "current-context", default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    #[serde(default)]
    pub server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(rename = "tokenFile", default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,

    #[serde(rename = "client-certificate", default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<PathBuf>,

    #[serde(rename = "client-certificate-data", default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,

    #[serde(rename = "client-key", default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,

    #[serde(rename = "client-key-data", default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,

    #[serde(default)]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Kubeconfig {
    /// Parse a kubeconfig from YAML text. `origin` is only used in errors.
    pub fn from_yaml(yaml: &str, origin: &str) -> Result<Self, KubeconfigError> {
        serde_yaml::from_str(yaml).map_err(|source| KubeconfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Read a kubeconfig file. Relative file references inside it are
    /// resolved against the file's directory.
    pub fn read(path: &Path) -> Result<Self, KubeconfigError> {
        let yaml = fs::read_to_string(path).map_err(|source| KubeconfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&yaml, &path.display().to_string())?;
        if let Some(dir) = path.parent() {
            config.make_paths_absolute(dir);
        }
        Ok(config)
    }

    /// Load using the standard precedence.
    pub fn load(explicit: Option<&Path>) -> Result<Self, KubeconfigError> {
        Self::load_from(
            explicit,
            std::env::var_os("KUBECONFIG"),
            dirs::home_dir().map(|home| home.join(".kube").join("config")),
        )
    }

    /// Load with the environment supplied by the caller.
    ///
    /// `env_paths` is a `$KUBECONFIG`-style path list. Files listed there that
    /// do not exist are skipped; entries are merged with the first definition
    /// of each name winning.
    pub fn load_from(
        explicit: Option<&Path>,
        env_paths: Option<OsString>,
        default_path: Option<PathBuf>,
    ) -> Result<Self, KubeconfigError> {
        if let Some(path) = explicit {
            return Self::read(path);
        }

        if let Some(paths) = env_paths.filter(|p| !p.is_empty()) {
            let mut merged: Option<Kubeconfig> = None;
            for path in std::env::split_paths(&paths) {
                if path.as_os_str().is_empty() || !path.exists() {
                    continue;
                }
                debug!(path = %path.display(), "Loading kubeconfig");
                let config = Self::read(&path)?;
                match merged.as_mut() {
                    Some(existing) => existing.merge(config),
                    None => merged = Some(config),
                }
            }
            return merged.ok_or(KubeconfigError::NotFound);
        }

        match default_path {
            Some(path) if path.exists() => Self::read(&path),
            _ => Err(KubeconfigError::NotFound),
        }
    }

    /// Merge `other` into `self`. Existing names are kept.
    pub fn merge(&mut self, other: Kubeconfig) {
        for cluster in other.clusters {
            if !self.clusters.iter().any(|c| c.name == cluster.name) {
                self.clusters.push(cluster);
            }
        }
        for user in other.users {
            if !self.users.iter().any(|u| u.name == user.name) {
                self.users.push(user);
            }
        }
        for context in other.contexts {
            if !self.contexts.iter().any(|c| c.name == context.name) {
                self.contexts.push(context);
            }
        }
        if self.current_context.as_deref().map_or(true, str::is_empty) {
            self.current_context = other.current_context;
        }
    }

    fn make_paths_absolute(&mut self, dir: &Path) {
        for named in &mut self.clusters {
            if let Some(ca) = named.cluster.certificate_authority.as_mut() {
                if ca.is_relative() {
                    *ca = dir.join(&*ca);
                }
            }
        }
        for named in &mut self.users {
            let user = &mut named.user;
            for file in [&mut user.token_file, &mut user.client_certificate, &mut user.client_key]
                .into_iter()
                .flatten()
            {
                if file.is_relative() {
                    *file = dir.join(&*file);
                }
            }
        }
    }

    /// Resolve a context into a target named after the context.
    ///
    /// An empty name selects the current-context.
    pub fn resolve_context(&self, name: &str) -> Result<ClusterTarget, KubeconfigError> {
        let name = if name.is_empty() {
            self.current_context
                .as_deref()
                .filter(|c| !c.is_empty())
                .ok_or(KubeconfigError::NoCurrentContext)?
        } else {
            name
        };

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
            .ok_or_else(|| KubeconfigError::ContextNotFound(name.to_string()))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| KubeconfigError::ClusterNotFound {
                context: name.to_string(),
                cluster: context.cluster.clone(),
            })?;

        if cluster.server.is_empty() {
            return Err(KubeconfigError::MissingServer(context.cluster.clone()));
        }

        let auth = if context.user.is_empty() {
            AuthMaterial::Anonymous
        } else {
            let user = self
                .users
                .iter()
                .find(|u| u.name == context.user)
                .map(|u| &u.user)
                .ok_or_else(|| KubeconfigError::UserNotFound {
                    context: name.to_string(),
                    user: context.user.clone(),
                })?;
            user_auth(&context.user, user)?
        };

        let tls = cluster_tls(&context.cluster, cluster)?;
        Ok(ClusterTarget::new(name, cluster.server.clone(), auth).with_tls(tls))
    }

    /// Build a kubeconfig containing exactly one context that points at `target`.
    pub fn for_target(target: &ClusterTarget) -> Self {
        let tls = target.tls();
        let cluster = ClusterEntry {
            server: target.server().to_string(),
            certificate_authority: None,
            certificate_authority_data: tls.ca_data.as_ref().map(|ca| BASE64.encode(ca)),
            insecure_skip_tls_verify: tls.insecure_skip_verify,
        };

        let user = match target.auth() {
            AuthMaterial::Token(token) => UserEntry {
                token: Some(token.clone()),
                ..Default::default()
            },
            AuthMaterial::Exec(exec) => UserEntry {
                exec: Some(exec.clone()),
                ..Default::default()
            },
            AuthMaterial::ClientCertificate { cert, key } => UserEntry {
                client_certificate_data: Some(BASE64.encode(cert)),
                client_key_data: Some(BASE64.encode(key)),
                ..Default::default()
            },
            AuthMaterial::Anonymous => UserEntry::default(),
        };

        Self {
            api_version: Some("v1".to_string()),
            kind: Some("Config".to_string()),
            clusters: vec![NamedCluster {
                name: GENERATED_CLUSTER.to_string(),
                cluster,
            }],
            users: vec![NamedUser {
                name: GENERATED_USER.to_string(),
                user,
            }],
            contexts: vec![NamedContext {
                name: target.name().to_string(),
                context: ContextEntry {
                    cluster: GENERATED_CLUSTER.to_string(),
                    user: GENERATED_USER.to_string(),
                    namespace: None,
                },
            }],
            current_context: Some(target.name().to_string()),
        }
    }

    pub fn to_yaml(&self) -> Result<String, KubeconfigError> {
        serde_yaml::to_string(self).map_err(KubeconfigError::Serialize)
    }
}

fn user_auth(name: &str, user: &UserEntry) -> Result<AuthMaterial, KubeconfigError> {
    if let Some(token) = user.token.as_ref().filter(|t| !t.is_empty()) {
        return Ok(AuthMaterial::Token(token.clone()));
    }
    if let Some(path) = &user.token_file {
        let token = fs::read_to_string(path).map_err(|source| KubeconfigError::Read {
            path: path.clone(),
            source,
        })?;
        return Ok(AuthMaterial::Token(token.trim().to_string()));
    }
    if let Some(exec) = &user.exec {
        return Ok(AuthMaterial::Exec(exec.clone()));
    }

    let cert = pem_material(
        name,
        "client-certificate-data",
        &user.client_certificate_data,
        &user.client_certificate,
    )?;
    let key = pem_material(name, "client-key-data", &user.client_key_data, &user.client_key)?;
    match (cert, key) {
        (Some(cert), Some(key)) => Ok(AuthMaterial::ClientCertificate { cert, key }),
        (None, None) => Ok(AuthMaterial::Anonymous),
        _ => Err(KubeconfigError::IncompleteClientCertificate(name.to_string())),
    }
}

/// Inline base64 data wins over a file reference.
fn pem_material(
    user: &str,
    field: &'static str,
    data: &Option<String>,
    path: &Option<PathBuf>,
) -> Result<Option<Vec<u8>>, KubeconfigError> {
    if let Some(data) = data.as_ref().filter(|d| !d.is_empty()) {
        let decoded = BASE64
            .decode(data.trim())
            .map_err(|source| KubeconfigError::InvalidUserData {
                user: user.to_string(),
                field,
                source,
            })?;
        return Ok(Some(decoded));
    }
    match path {
        Some(path) => fs::read(path)
            .map(Some)
            .map_err(|source| KubeconfigError::Read {
                path: path.clone(),
                source,
            }),
        None => Ok(None),
    }
}

fn cluster_tls(name: &str, cluster: &ClusterEntry) -> Result<TlsSettings, KubeconfigError> {
    let ca_data = if let Some(data) = &cluster.certificate_authority_data {
        let decoded = BASE64
            .decode(data.trim())
            .map_err(|source| KubeconfigError::InvalidCaData {
                cluster: name.to_string(),
                source,
            })?;
        Some(decoded)
    } else if let Some(path) = &cluster.certificate_authority {
        let pem = fs::read(path).map_err(|source| KubeconfigError::Read {
            path: path.clone(),
            source,
        })?;
        Some(pem)
    } else {
        None
    };

    Ok(TlsSettings {
        ca_data,
        insecure_skip_verify: cluster.insecure_skip_tls_verify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev-cluster
  cluster:
    server: https://dev.example.com:6443
    certificate-authority-data: Q0EtUEVN
- name: prod-cluster
  cluster:
    server: https://prod.example.com
    insecure-skip-tls-verify: true
users:
- name: dev-user
  user:
    token: dev-token
- name: prod-user
  user:
    exec:
      apiVersion: client.authentication.k8s.io/v1beta1
      command: get-token
      args: ["--cluster", "prod"]
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: dev-user
- name: prod
  context:
    cluster: prod-cluster
    user: prod-user
    namespace: kube-system
- name: broken
  context:
    cluster: missing-cluster
    user: dev-user
"#;

    fn sample() -> Kubeconfig {
        Kubeconfig::from_yaml(SAMPLE, "sample").unwrap()
    }

    #[test]
    fn test_resolve_token_context() {
        let target = sample().resolve_context("dev").unwrap();

        assert_eq!(target.name(), "dev");
        assert_eq!(target.server(), "https://dev.example.com:6443");
        assert_eq!(target.auth(), &AuthMaterial::Token("dev-token".to_string()));
        assert_eq!(target.tls().ca_data.as_deref(), Some(&b"CA-PEM"[..]));
        assert!(!target.tls().insecure_skip_verify);
    }

    #[test]
    fn test_resolve_exec_context() {
        let target = sample().resolve_context("prod").unwrap();

        match target.auth() {
            AuthMaterial::Exec(exec) => {
                assert_eq!(exec.command, "get-token");
                assert_eq!(exec.args.as_deref(), Some(&["--cluster".to_string(), "prod".to_string()][..]));
            }
            other => panic!("expected exec auth, got {:?}", other),
        }
        assert!(target.tls().insecure_skip_verify);
    }

    #[test]
    fn test_empty_name_uses_current_context() {
        let target = sample().resolve_context("").unwrap();
        assert_eq!(target.name(), "dev");
    }

    #[test]
    fn test_missing_references() {
        let config = sample();
        assert!(matches!(
            config.resolve_context("nope"),
            Err(KubeconfigError::ContextNotFound(name)) if name == "nope"
        ));
        assert!(matches!(
            config.resolve_context("broken"),
            Err(KubeconfigError::ClusterNotFound { .. })
        ));
    }

    #[test]
    fn test_token_file_relative_to_kubeconfig() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("token"), "file-token\n").unwrap();
        fs::write(
            dir.path().join("config"),
            r#"
clusters:
- name: c
  cluster:
    server: https://c
users:
- name: u
  user:
    tokenFile: token
contexts:
- name: ctx
  context:
    cluster: c
    user: u
"#,
        )
        .unwrap();

        let config = Kubeconfig::read(&dir.path().join("config")).unwrap();
        let target = config.resolve_context("ctx").unwrap();
        assert_eq!(target.auth().bearer_token(), Some("file-token"));
    }

    #[test]
    fn test_env_paths_merge_first_wins() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::write(
            &first,
            "clusters:\n- name: c\n  cluster:\n    server: https://first\ncontexts:\n- name: a\n  context:\n    cluster: c\n",
        )
        .unwrap();
        fs::write(
            &second,
            "current-context: b\nclusters:\n- name: c\n  cluster:\n    server: https://second\ncontexts:\n- name: b\n  context:\n    cluster: c\n",
        )
        .unwrap();

        let missing = dir.path().join("missing");
        let paths = std::env::join_paths([&first, &missing, &second]).unwrap();
        let config = Kubeconfig::load_from(None, Some(paths), None).unwrap();

        assert_eq!(config.current_context.as_deref(), Some("b"));
        let target = config.resolve_context("b").unwrap();
        assert_eq!(target.server(), "https://first");
    }

    #[test]
    fn test_load_without_any_source() {
        let result = Kubeconfig::load_from(None, None, None);
        assert!(matches!(result, Err(KubeconfigError::NotFound)));
    }

    #[test]
    fn test_for_target_single_context() {
        let target = sample().resolve_context("dev").unwrap();
        let generated = Kubeconfig::for_target(&target);
        let yaml = generated.to_yaml().unwrap();

        let reparsed = Kubeconfig::from_yaml(&yaml, "generated").unwrap();
        assert_eq!(reparsed.current_context.as_deref(), Some("dev"));
        assert_eq!(reparsed.contexts.len(), 1);

        let again = reparsed.resolve_context("").unwrap();
        assert_eq!(again.server(), target.server());
        assert_eq!(again.auth(), target.auth());
        assert_eq!(again.tls(), target.tls());
    }

    const CLIENT_CERT: &str = r#"
clusters:
- name: kind
  cluster:
    server: https://127.0.0.1:6443
users:
- name: kind-admin
  user:
    client-certificate-data: Q0VSVC1QRU0=
    client-key-data: S0VZLVBFTQ==
- name: half
  user:
    client-certificate-data: Q0VSVC1QRU0=
contexts:
- name: kind
  context:
    cluster: kind
    user: kind-admin
- name: half
  context:
    cluster: kind
    user: half
"#;

    #[test]
    fn test_resolve_client_certificate_context() {
        let config = Kubeconfig::from_yaml(CLIENT_CERT, "kind").unwrap();
        let target = config.resolve_context("kind").unwrap();

        assert_eq!(
            target.auth(),
            &AuthMaterial::ClientCertificate {
                cert: b"CERT-PEM".to_vec(),
                key: b"KEY-PEM".to_vec(),
            }
        );

        let yaml = Kubeconfig::for_target(&target).to_yaml().unwrap();
        assert!(yaml.contains("client-certificate-data: Q0VSVC1QRU0="));
        let again = Kubeconfig::from_yaml(&yaml, "generated")
            .unwrap()
            .resolve_context("")
            .unwrap();
        assert_eq!(again.auth(), target.auth());
    }

    #[test]
    fn test_half_client_certificate_is_rejected() {
        let config = Kubeconfig::from_yaml(CLIENT_CERT, "kind").unwrap();
        assert!(matches!(
            config.resolve_context("half"),
            Err(KubeconfigError::IncompleteClientCertificate(user)) if user == "half"
        ));
    }

    #[test]
    fn test_client_certificate_files_relative_to_kubeconfig() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("admin.crt"), "CERT").unwrap();
        fs::write(dir.path().join("admin.key"), "KEY").unwrap();
        fs::write(
            dir.path().join("config"),
            r#"
clusters:
- name: c
  cluster:
    server: https://c
users:
- name: u
  user:
    client-certificate: admin.crt
    client-key: admin.key
contexts:
- name: ctx
  context:
    cluster: c
    user: u
"#,
        )
        .unwrap();

        let config = Kubeconfig::read(&dir.path().join("config")).unwrap();
        let target = config.resolve_context("ctx").unwrap();
        assert_eq!(
            target.auth(),
            &AuthMaterial::ClientCertificate {
                cert: b"CERT".to_vec(),
                key: b"KEY".to_vec(),
            }
        );
    }
}
