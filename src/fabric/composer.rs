//! Hyperledger Composer: business network archive secret plus the
//! `hl-composer` release, deployed next to the peers.

use tracing::info;

use super::crypto::Artifact;
use super::Deployer;
use crate::helm::{Overlay, ReleaseDescriptor, ReleaseMode};
use crate::{Error, Result};

/// CLI, REST server and playground
const COMPOSER_PODS: usize = 3;

impl Deployer {
    /// Store the business network archive and deploy Composer.
    ///
    /// On upgrade the REST server API key is carried over from its secret.
    pub async fn deploy_composer(&self) -> Result<()> {
        let composer = self
            .settings
            .composer
            .as_ref()
            .ok_or_else(|| Error::validation("settings have no composer section"))?;
        let peers = self
            .settings
            .peers
            .as_ref()
            .ok_or_else(|| Error::validation("composer needs a peers section"))?;
        let namespace = self.settings.msp_namespace(&peers.msp)?;

        self.store_artifact(Artifact {
            secret: &composer.secret_bna,
            namespace: namespace.clone(),
            file_name: composer.bna.clone(),
            command: None,
        })
        .await?;

        info!(release = %composer.name, namespace = %namespace, "Deploying Composer");
        let mut descriptor =
            ReleaseDescriptor::new(self.chart_repo(), "hl-composer", &composer.name, &namespace)
                .with_values_file(self.settings.values_file("hl-composer", &composer.name))
                .with_expected_instances(COMPOSER_PODS);
        if self.mode == ReleaseMode::Upgrade {
            descriptor = descriptor.with_overlay(Overlay::from_secret(
                format!("{}-hl-composer-rest", composer.name),
                "COMPOSER_APIKEY",
                "rest.config.apiKey",
            ));
        }
        self.releases.install_or_upgrade(&descriptor, self.mode).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    use super::super::test_support::*;
    use crate::cluster::MockSecretStore;
    use crate::config::{ComposerSettings, Settings};
    use crate::exec::fake::ScriptedExecutor;
    use crate::helm::ReleaseMode;
    use crate::Error;

    fn composer_settings(dir: &Path) -> Settings {
        std::fs::write(dir.join("net.bna"), b"archive").unwrap();
        let mut settings = settings(dir);
        settings.composer = Some(ComposerSettings {
            name: "hlc".to_string(),
            bna: "net.bna".to_string(),
            secret_bna: "hlc--bna".to_string(),
        });
        settings
    }

    #[tokio::test]
    async fn install_stores_archive_and_waits_for_all_pods() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(fresh_install(ScriptedExecutor::new(), 3));

        let mut secrets = MockSecretStore::new();
        secrets.expect_read().never();
        secrets.expect_exists().returning(|_, _| Ok(false));
        secrets
            .expect_create()
            .withf(|name, namespace, data| {
                name == "hlc--bna"
                    && namespace == "peers"
                    && data.get("net.bna").map(Vec::as_slice) == Some(&b"archive"[..])
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        deployer(
            composer_settings(dir.path()),
            executor.clone(),
            secrets,
            ReleaseMode::Install,
        )
        .deploy_composer()
        .await
        .unwrap();

        let commands = executor.commands();
        assert_eq!(
            commands[1],
            "helm install hlf-charts/hl-composer -n hlc --namespace peers \
             -f /values/hl-composer/hlc.yaml"
        );
        assert!(commands[2].contains("app=hl-composer,release=hlc"));
        assert_eq!(commands.len(), 4);
    }

    #[tokio::test]
    async fn upgrade_preserves_rest_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(upgrade(ScriptedExecutor::new(), 3));

        let mut secrets = MockSecretStore::new();
        secrets.expect_exists().returning(|_, _| Ok(true));
        secrets.expect_create().never();
        secrets
            .expect_read()
            .withf(|name, namespace| name == "hlc-hl-composer-rest" && namespace == "peers")
            .times(1)
            .returning(|_, _| {
                Ok(BTreeMap::from([(
                    "COMPOSER_APIKEY".to_string(),
                    "k3y".to_string(),
                )]))
            });

        deployer(
            composer_settings(dir.path()),
            executor.clone(),
            secrets,
            ReleaseMode::Upgrade,
        )
        .deploy_composer()
        .await
        .unwrap();

        assert_eq!(
            executor.commands()[1],
            "helm upgrade hlc hlf-charts/hl-composer -f /values/hl-composer/hlc.yaml \
             --set rest.config.apiKey=k3y"
        );
    }

    #[tokio::test]
    async fn missing_composer_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());

        let err = deployer(
            settings(dir.path()),
            executor.clone(),
            secrets(&[]),
            ReleaseMode::Install,
        )
        .deploy_composer()
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(executor.commands().is_empty());
    }
}
