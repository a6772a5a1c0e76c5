//! Fabric network components
//!
//! Each component (CA, crypto, orderer, peer, Composer) is a fixed recipe
//! of Helm releases derived from the settings document. [`Deployer`] owns
//! the collaborators shared by all recipes; the recipes themselves live in
//! one module per component.

mod ca;
mod composer;
mod crypto;
mod orderer;
mod peer;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::{NamespaceManager, SecretStore};
use crate::config::Settings;
use crate::exec::CommandExecutor;
use crate::helm::{ReleaseManager, ReleaseMode};
use crate::poll::PollPolicy;
use crate::{Error, Result};

/// Repository alias of the upstream PostgreSQL chart backing each CA
const STABLE_REPO: &str = "stable";

/// Repository alias of the upstream Kafka chart
const INCUBATOR_REPO: &str = "incubator";

/// Deploys Fabric components onto the cluster targeted by the settings.
pub struct Deployer {
    settings: Settings,
    releases: ReleaseManager,
    executor: Arc<dyn CommandExecutor>,
    secrets: Arc<dyn SecretStore>,
    namespaces: Arc<dyn NamespaceManager>,
    mode: ReleaseMode,
    cancel: CancellationToken,
}

impl Deployer {
    /// Create a deployer installing releases with the default readiness policy
    pub fn new(
        settings: Settings,
        executor: Arc<dyn CommandExecutor>,
        secrets: Arc<dyn SecretStore>,
        namespaces: Arc<dyn NamespaceManager>,
        cancel: CancellationToken,
    ) -> Self {
        let releases = ReleaseManager::new(
            executor.clone(),
            secrets.clone(),
            PollPolicy::default(),
            cancel.clone(),
        );
        Self {
            settings,
            releases,
            executor,
            secrets,
            namespaces,
            mode: ReleaseMode::Install,
            cancel,
        }
    }

    /// Upgrade existing releases instead of installing new ones
    pub fn with_mode(mut self, mode: ReleaseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_readiness(mut self, policy: PollPolicy) -> Self {
        self.releases = ReleaseManager::new(
            self.executor.clone(),
            self.secrets.clone(),
            policy,
            self.cancel.clone(),
        );
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Make sure Helm can talk to the cluster
    pub async fn init(&self) -> Result<()> {
        self.releases.bootstrap().await
    }

    /// Whole network: CAs, crypto material, orderers, then peers.
    pub async fn deploy_network(&self) -> Result<()> {
        self.init().await?;
        self.deploy_cas().await?;
        self.generate_crypto().await?;
        self.deploy_orderers().await?;
        self.deploy_peers().await?;
        info!("Fabric network deployed");
        Ok(())
    }

    /// Fabric network followed by Composer.
    pub async fn deploy_all(&self) -> Result<()> {
        self.deploy_network().await?;
        self.deploy_composer().await
    }

    /// Run a command unless the run was cancelled
    async fn run(&self, command: &str) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.executor.execute(command).await
    }

    fn chart_repo(&self) -> &str {
        &self.settings.core.chart_repo
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::cluster::{MockNamespaceManager, MockSecretStore};
    use crate::exec::fake::ScriptedExecutor;

    pub(crate) fn settings(dir_config: &Path) -> Settings {
        let mut settings: Settings = serde_yaml::from_str(
            r#"
core:
  namespace: fabric
  chart_repo: hlf-charts
  dir_config: /unused
  dir_values: /values
msps:
  OrdererMSP:
    namespace: orderers
  PeerMSP:
    namespace: peers
cas:
  ca:
    namespace: cas
orderers:
  msp: OrdererMSP
  names: [ord0]
peers:
  msp: PeerMSP
  names: [peer0]
  channel_name: mychannel
  channel_profile: MyChannel
"#,
        )
        .unwrap();
        settings.core.dir_config = dir_config.to_path_buf();
        settings
    }

    /// Namespace manager accepting any namespace
    pub(crate) fn namespaces() -> MockNamespaceManager {
        let mut namespaces = MockNamespaceManager::new();
        namespaces.expect_ensure_namespace().returning(|_| Ok(()));
        namespaces
    }

    /// Secret store serving fixed data for every secret
    pub(crate) fn secrets(data: &[(&str, &str)]) -> MockSecretStore {
        let data: BTreeMap<String, String> = data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut secrets = MockSecretStore::new();
        secrets
            .expect_read()
            .returning(move |_, _| Ok(data.clone()));
        secrets
    }

    pub(crate) fn deployer(
        settings: Settings,
        executor: Arc<ScriptedExecutor>,
        secrets: MockSecretStore,
        mode: ReleaseMode,
    ) -> Deployer {
        Deployer::new(
            settings,
            executor,
            Arc::new(secrets),
            Arc::new(namespaces()),
            CancellationToken::new(),
        )
        .with_mode(mode)
        .with_readiness(PollPolicy {
            max_attempts: 2,
            interval: Duration::from_millis(1),
        })
    }

    /// Queue a fresh install followed by `pods` running pods
    pub(crate) fn fresh_install(executor: ScriptedExecutor, pods: usize) -> ScriptedExecutor {
        executor.fail().ok("").then_ready(pods)
    }

    /// Queue an existing release upgraded and then ready
    pub(crate) fn upgrade(executor: ScriptedExecutor, pods: usize) -> ScriptedExecutor {
        executor.ok("DEPLOYED").ok("").then_ready(pods)
    }

    pub(crate) trait ReadyExt {
        fn then_ready(self, pods: usize) -> Self;
    }

    impl ReadyExt for ScriptedExecutor {
        fn then_ready(self, pods: usize) -> Self {
            let phases = vec!["Running"; pods].join(" ");
            let names = (0..pods)
                .map(|i| format!("pod-{}", i))
                .collect::<Vec<_>>()
                .join(" ");
            self.ok(&phases).ok(&names)
        }
    }
}
