//! Cluster-side collaborators
//!
//! The orchestration engine only needs three things from the cluster: the
//! identity of the active kube context, namespace-scoped secrets, and
//! idempotent namespace creation. Each sits behind a trait so tests can mock
//! Kubernetes while production code goes through kube-rs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::error::CommandErrorExt;
use crate::{Error, Result};

/// Reads the cluster targeted by the active kube context.
#[cfg_attr(test, automock)]
pub trait ClusterContext: Send + Sync {
    /// Name of the cluster referenced by the current context
    fn current_cluster(&self) -> Result<String>;
}

/// [`ClusterContext`] backed by a kubeconfig file.
///
/// With no explicit path the kube defaults apply (`KUBECONFIG` env, then
/// `~/.kube/config`).
#[derive(Debug, Clone, Default)]
pub struct KubeconfigContext {
    path: Option<PathBuf>,
}

impl KubeconfigContext {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ClusterContext for KubeconfigContext {
    fn current_cluster(&self) -> Result<String> {
        context_cluster(&read_kubeconfig(self.path.as_deref())?)
    }
}

/// Read an explicit kubeconfig, or fall back to the kube defaults.
fn read_kubeconfig(path: Option<&Path>) -> Result<Kubeconfig> {
    match path {
        Some(path) => Kubeconfig::read_from(path).map_err(|e| {
            Error::validation(format!(
                "failed to read kubeconfig {}: {}",
                path.display(),
                e
            ))
        }),
        None => Kubeconfig::read()
            .map_err(|e| Error::validation(format!("failed to read kubeconfig: {}", e))),
    }
}

/// Resolve `current-context` to the cluster it points at.
fn context_cluster(kubeconfig: &Kubeconfig) -> Result<String> {
    let current = kubeconfig
        .current_context
        .as_deref()
        .ok_or_else(|| Error::validation("kubeconfig has no current-context"))?;

    kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == current)
        .and_then(|named| named.context.as_ref())
        .map(|context| context.cluster.clone())
        .ok_or_else(|| {
            Error::validation(format!("context '{}' not found in kubeconfig", current))
        })
}

/// Flatten a secret into UTF-8 strings.
///
/// `data` wins over `stringData` for the same key; non UTF-8 values are
/// skipped.
fn decode_secret(name: &str, secret: Secret) -> BTreeMap<String, String> {
    let mut decoded = secret.string_data.unwrap_or_default();
    for (key, value) in secret.data.unwrap_or_default() {
        match String::from_utf8(value.0) {
            Ok(text) => {
                decoded.insert(key, text);
            }
            Err(_) => debug!(secret = %name, key = %key, "Skipping non UTF-8 secret key"),
        }
    }
    decoded
}

/// Namespace-scoped secret storage.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read every key of a secret as UTF-8 strings.
    ///
    /// Returns [`Error::SecretNotFound`] when the secret does not exist.
    async fn read(&self, name: &str, namespace: &str) -> Result<BTreeMap<String, String>>;

    /// Check whether a secret exists
    async fn exists(&self, name: &str, namespace: &str) -> Result<bool>;

    /// Create a secret; an existing secret with the same name is left untouched.
    async fn create(
        &self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<()>;
}

/// Idempotent namespace creation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceManager: Send + Sync {
    async fn ensure_namespace(&self, name: &str) -> Result<()>;
}

/// Production [`SecretStore`] and [`NamespaceManager`] using the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or from the default
    /// resolution chain when `path` is `None`
    pub async fn connect(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::new(Client::try_default().await?));
        };

        let kubeconfig = read_kubeconfig(Some(path))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .cmd_err()?;
        Ok(Self::new(Client::try_from(config)?))
    }
}

#[async_trait]
impl SecretStore for KubeCluster {
    async fn read(&self, name: &str, namespace: &str) -> Result<BTreeMap<String, String>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match secrets.get(name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::SecretNotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        Ok(decode_secret(name, secret))
    }

    async fn exists(&self, name: &str, namespace: &str) -> Result<bool> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.get(name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(
        &self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(key, value)| (key, ByteString(value)))
                    .collect(),
            ),
            ..Default::default()
        };

        match secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                info!(secret = %name, namespace = %namespace, "Created secret");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(secret = %name, namespace = %namespace, "Secret already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl NamespaceManager for KubeCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!(namespace = %name, "Created namespace");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(namespace = %name, "Namespace already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
