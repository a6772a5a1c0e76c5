//! Peers: a CouchDB state database and an `hlf-peer` release per peer name.

use tracing::info;

use super::Deployer;
use crate::helm::{Overlay, ReleaseDescriptor, ReleaseMode};
use crate::{Error, Result};

impl Deployer {
    pub async fn deploy_peers(&self) -> Result<()> {
        let peers = self
            .settings
            .peers
            .as_ref()
            .ok_or_else(|| Error::validation("settings have no peers section"))?;
        let namespace = self.settings.msp_namespace(&peers.msp)?;
        self.namespaces.ensure_namespace(&namespace).await?;

        for name in &peers.names {
            self.deploy_peer(name, &namespace).await?;
        }
        Ok(())
    }

    async fn deploy_peer(&self, name: &str, namespace: &str) -> Result<()> {
        info!(peer = %name, namespace = %namespace, "Deploying peer");

        let couchdb_release = format!("cdb-{}", name);
        let mut couchdb =
            ReleaseDescriptor::new(self.chart_repo(), "hlf-couchdb", &couchdb_release, namespace)
                .with_values_file(self.settings.values_file("hlf-couchdb", &couchdb_release));
        if self.mode == ReleaseMode::Upgrade {
            let secret = format!("{}-hlf-couchdb", couchdb_release);
            couchdb = couchdb
                .with_overlay(Overlay::from_secret(
                    &secret,
                    "COUCHDB_USERNAME",
                    "couchdbUsername",
                ))
                .with_overlay(Overlay::from_secret(
                    &secret,
                    "COUCHDB_PASSWORD",
                    "couchdbPassword",
                ));
        }
        self.releases.install_or_upgrade(&couchdb, self.mode).await?;

        let peer = ReleaseDescriptor::new(self.chart_repo(), "hlf-peer", name, namespace)
            .with_values_file(self.settings.values_file("hlf-peer", name));
        self.releases.install_or_upgrade(&peer, self.mode).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::super::test_support::*;
    use crate::cluster::MockSecretStore;
    use crate::exec::fake::ScriptedExecutor;
    use crate::helm::ReleaseMode;
    use crate::Error;

    #[tokio::test]
    async fn install_deploys_couchdb_before_peer() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(fresh_install(fresh_install(ScriptedExecutor::new(), 1), 1));
        let mut secrets = MockSecretStore::new();
        secrets.expect_read().never();

        deployer(settings(dir.path()), executor.clone(), secrets, ReleaseMode::Install)
            .deploy_peers()
            .await
            .unwrap();

        let commands = executor.commands();
        assert_eq!(
            commands[1],
            "helm install hlf-charts/hlf-couchdb -n cdb-peer0 --namespace peers \
             -f /values/hlf-couchdb/cdb-peer0.yaml"
        );
        assert_eq!(
            commands[5],
            "helm install hlf-charts/hlf-peer -n peer0 --namespace peers \
             -f /values/hlf-peer/peer0.yaml"
        );
    }

    #[tokio::test]
    async fn upgrade_preserves_couchdb_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(upgrade(upgrade(ScriptedExecutor::new(), 1), 1));
        let mut secrets = MockSecretStore::new();
        secrets
            .expect_read()
            .withf(|name, namespace| name == "cdb-peer0-hlf-couchdb" && namespace == "peers")
            .times(1)
            .returning(|_, _| {
                Ok(BTreeMap::from([
                    ("COUCHDB_USERNAME".to_string(), "couch".to_string()),
                    ("COUCHDB_PASSWORD".to_string(), "s3cret".to_string()),
                ]))
            });

        deployer(settings(dir.path()), executor.clone(), secrets, ReleaseMode::Upgrade)
            .deploy_peers()
            .await
            .unwrap();

        let commands = executor.commands();
        assert_eq!(
            commands[1],
            "helm upgrade cdb-peer0 hlf-charts/hlf-couchdb -f /values/hlf-couchdb/cdb-peer0.yaml \
             --set couchdbUsername=couch --set couchdbPassword=s3cret"
        );
        assert_eq!(
            commands[5],
            "helm upgrade peer0 hlf-charts/hlf-peer -f /values/hlf-peer/peer0.yaml"
        );
    }

    #[tokio::test]
    async fn upgrade_of_missing_peer_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // CouchDB exists, the peer itself was never installed
        let executor = Arc::new(upgrade(ScriptedExecutor::new(), 1).fail());
        let secrets = secrets(&[
            ("COUCHDB_USERNAME", "couch"),
            ("COUCHDB_PASSWORD", "s3cret"),
        ]);

        let err = deployer(settings(dir.path()), executor.clone(), secrets, ReleaseMode::Upgrade)
            .deploy_peers()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Precondition(_)));
        assert_eq!(executor.commands().last().unwrap(), "helm status peer0");
    }
}
