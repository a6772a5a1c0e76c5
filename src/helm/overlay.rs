//! Value overlays for `helm install` / `helm upgrade`.
//!
//! Overlays become `--set` / `--set-string` flags appended to the Helm
//! command line. Values generated at first install (database passwords, CA
//! admin credentials) live in Kubernetes secrets and are carried across
//! upgrades with [`Overlay::FromSecret`].
//!
//! Values are shell-quoted unless they are plain words, since the rendered
//! flags end up on a `sh -c` command line.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::cluster::SecretStore;
use crate::Result;

/// A single chart value override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overlay {
    /// `--set key=value`, Helm infers the type
    Literal { key: String, value: String },
    /// `--set-string key=value`, always a string
    StringTyped { key: String, value: String },
    /// `--set key=<secret[field]>`, unless an explicit overlay sets `key`
    FromSecret {
        secret: String,
        field: String,
        key: String,
    },
}

impl Overlay {
    pub fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Overlay::Literal {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Overlay::StringTyped {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Preserve `field` of `secret` as chart value `key`
    pub fn from_secret(
        secret: impl Into<String>,
        field: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Overlay::FromSecret {
            secret: secret.into(),
            field: field.into(),
            key: key.into(),
        }
    }

    /// Chart value targeted by this overlay
    pub fn key(&self) -> &str {
        match self {
            Overlay::Literal { key, .. }
            | Overlay::StringTyped { key, .. }
            | Overlay::FromSecret { key, .. } => key,
        }
    }

    fn is_explicit(&self) -> bool {
        !matches!(self, Overlay::FromSecret { .. })
    }
}

/// Render overlays into the flag suffix of a Helm command.
///
/// Explicit overlays are emitted in order. Secret-backed overlays follow,
/// except those whose key an explicit overlay already sets; shadowed secrets
/// are not read. Each secret is read at most once per call. A field missing
/// from an existing secret is skipped; secret store failures propagate.
pub async fn assemble_overlay(
    secrets: &dyn SecretStore,
    namespace: &str,
    overlays: &[Overlay],
) -> Result<String> {
    let mut rendered = String::new();

    for overlay in overlays {
        match overlay {
            Overlay::Literal { key, value } => {
                rendered.push_str(&format!(" --set {}={}", key, shell_words::quote(value)));
            }
            Overlay::StringTyped { key, value } => {
                rendered.push_str(&format!(
                    " --set-string {}={}",
                    key,
                    shell_words::quote(value)
                ));
            }
            Overlay::FromSecret { .. } => {}
        }
    }

    let explicit: HashSet<&str> = overlays
        .iter()
        .filter(|o| o.is_explicit())
        .map(Overlay::key)
        .collect();
    let mut cache: BTreeMap<&str, BTreeMap<String, String>> = BTreeMap::new();

    for overlay in overlays {
        let Overlay::FromSecret { secret, field, key } = overlay else {
            continue;
        };

        if explicit.contains(key.as_str()) {
            debug!(key = %key, secret = %secret, "Explicit value shadows preserved secret");
            continue;
        }

        if !cache.contains_key(secret.as_str()) {
            let data = secrets.read(secret, namespace).await?;
            cache.insert(secret.as_str(), data);
        }

        match cache.get(secret.as_str()).and_then(|data| data.get(field)) {
            Some(value) => {
                rendered.push_str(&format!(" --set {}={}", key, shell_words::quote(value)))
            }
            None => warn!(
                secret = %secret,
                field = %field,
                namespace = %namespace,
                "Preserved field missing from secret, skipping"
            ),
        }
    }

    Ok(rendered)
}
