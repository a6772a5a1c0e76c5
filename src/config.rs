//! Settings document for a Fabric network deployment.
//!
//! One YAML file describes the whole network:
//! - `core`: default namespace, target cluster, chart repository and the
//!   local directories holding generated config and Helm values
//! - `msps` / `cas`: named entities, each optionally pinned to a namespace
//! - `orderers` / `peers`: the nodes to deploy
//! - `composer`: optional management layer on top of the peers
//!
//! The file is read once per command and never cached.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::ClusterContext;
use crate::{Error, Result};

/// Top-level settings document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub core: CoreSettings,
    #[serde(default)]
    pub msps: BTreeMap<String, MspSettings>,
    #[serde(default)]
    pub cas: BTreeMap<String, CaSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orderers: Option<OrdererSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<PeerSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composer: Option<ComposerSettings>,
}

/// Deployment-wide defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSettings {
    /// Namespace used by any entity without an override
    pub namespace: String,
    /// Cluster the active kube context must point at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Helm repository alias, or a local directory of charts
    pub chart_repo: String,
    pub dir_config: PathBuf,
    pub dir_values: PathBuf,
}

/// Membership service provider entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MspSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// CA issuing identities for this MSP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

/// Certificate authority entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdererSettings {
    pub msp: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default = "default_genesis_secret")]
    pub secret_genesis: String,
    #[serde(default = "default_genesis_profile")]
    pub genesis_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka: Option<KafkaSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    /// Number of Kafka broker pods expected to run
    pub pod_num: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    pub msp: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub channel_name: String,
    pub channel_profile: String,
    #[serde(default = "default_channel_secret")]
    pub secret_channel: String,
}

/// Hyperledger Composer deployment, placed in the peer namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerSettings {
    /// Release name of the `hl-composer` chart
    #[serde(default = "default_composer_name")]
    pub name: String,
    /// Business network archive, relative to `core.dir_config`
    pub bna: String,
    /// Secret the archive is stored in
    #[serde(default = "default_bna_secret")]
    pub secret_bna: String,
}

fn default_composer_name() -> String {
    "hlc".to_string()
}

fn default_bna_secret() -> String {
    "hlc--bna".to_string()
}

fn default_genesis_secret() -> String {
    "hlf--genesis".to_string()
}

fn default_genesis_profile() -> String {
    "OrdererGenesis".to_string()
}

fn default_channel_secret() -> String {
    "hlf--channel".to_string()
}

/// Kind of named entity that can carry its own namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Entry of the `msps` mapping
    Msp,
    /// Entry of the `cas` mapping
    Ca,
}

impl EntityKind {
    /// Look `name` up in this kind's mapping.
    ///
    /// `None` when the entity is absent; `Some(None)` when present without
    /// a namespace override.
    fn namespace_override<'a>(
        self,
        settings: &'a Settings,
        name: &str,
    ) -> Option<Option<&'a str>> {
        match self {
            EntityKind::Msp => settings.msps.get(name).map(|m| m.namespace.as_deref()),
            EntityKind::Ca => settings.cas.get(name).map(|c| c.namespace.as_deref()),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Msp => write!(f, "MSP"),
            EntityKind::Ca => write!(f, "CA"),
        }
    }
}

/// Resolve the namespace an entity is deployed to.
///
/// With no entity the core namespace is returned. A present entity with an
/// empty or missing override falls back to the core namespace; an entity
/// missing from its mapping is an error.
pub fn resolve_namespace(
    settings: &Settings,
    entity: Option<(EntityKind, &str)>,
) -> Result<String> {
    let Some((kind, name)) = entity else {
        return Ok(settings.core.namespace.clone());
    };

    match kind.namespace_override(settings, name) {
        Some(Some(namespace)) if !namespace.is_empty() => Ok(namespace.to_string()),
        Some(_) => Ok(settings.core.namespace.clone()),
        None => Err(Error::Lookup {
            kind,
            name: name.to_string(),
        }),
    }
}

impl Settings {
    /// Namespace of a CA
    pub fn ca_namespace(&self, ca: &str) -> Result<String> {
        resolve_namespace(self, Some((EntityKind::Ca, ca)))
    }

    /// Namespace of an MSP
    pub fn msp_namespace(&self, msp: &str) -> Result<String> {
        resolve_namespace(self, Some((EntityKind::Msp, msp)))
    }

    /// Path of a values file under `core.dir_values`
    pub fn values_file(&self, chart_dir: &str, release: &str) -> PathBuf {
        self.core
            .dir_values
            .join(chart_dir)
            .join(format!("{}.yaml", release))
    }
}

/// Fail unless the active kube context targets `expected`.
pub fn validate_cluster(context: &dyn ClusterContext, expected: &str) -> Result<()> {
    let actual = context.current_cluster()?;
    if actual != expected {
        return Err(Error::ClusterMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    debug!(cluster = %actual, "Kube context matches settings");
    Ok(())
}

/// Load and normalise a settings file.
///
/// Directory paths are `~`-expanded and made absolute. A `chart_repo` that
/// names a local directory is normalised the same way and skips the cluster
/// check; any other chart source requires the active context to match
/// `core.cluster`.
pub fn load_config(path: &Path, context: &dyn ClusterContext) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(path, format!("failed to read: {}", e)))?;
    let mut settings: Settings = serde_yaml::from_str(&content)
        .map_err(|e| Error::config(path, format!("failed to parse: {}", e)))?;

    let chart_dir = expand_path(Path::new(&settings.core.chart_repo))
        .map_err(|e| Error::config(path, e.to_string()))?;
    if chart_dir.is_dir() {
        debug!(chart_repo = %chart_dir.display(), "Using local chart directory");
        settings.core.chart_repo = chart_dir.to_string_lossy().into_owned();
    } else {
        let cluster = settings.core.cluster.as_deref().ok_or_else(|| {
            Error::config(path, "core.cluster is required for a remote chart_repo")
        })?;
        validate_cluster(context, cluster)?;
    }

    settings.core.dir_config =
        expand_path(&settings.core.dir_config).map_err(|e| Error::config(path, e.to_string()))?;
    settings.core.dir_values =
        expand_path(&settings.core.dir_values).map_err(|e| Error::config(path, e.to_string()))?;

    Ok(settings)
}

/// Expand a leading `~` and make the path absolute, resolving `.` and `..`
/// lexically.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .ok_or_else(|| Error::validation("could not determine home directory"))?
            .join(rest),
        Err(_) => path.to_path_buf(),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}
