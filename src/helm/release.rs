//! Helm release lifecycle: bootstrap, install, upgrade.
//!
//! Every release goes through the same sequence:
//! 1. Ask Helm whether the release exists
//! 2. Install it (if absent) or upgrade it (if present)
//! 3. Poll its pods until the expected number are running
//!
//! Install is idempotent: an existing release is left alone but still
//! checked for readiness. Upgrade refuses to run against a missing release.
//! Nothing is rolled back on failure; a rerun resumes from whatever state
//! Helm left behind.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::overlay::{assemble_overlay, Overlay};
use super::readiness::ReadinessPoller;
use crate::cluster::SecretStore;
use crate::exec::CommandExecutor;
use crate::poll::{poll_until, PollPolicy};
use crate::{Error, Result};

/// Namespace Tiller is installed into
const TILLER_NAMESPACE: &str = "kube-system";

/// Service account Tiller runs as
const TILLER_SERVICE_ACCOUNT: &str = "tiller";

/// Deployment created by `helm init`
const TILLER_DEPLOYMENT: &str = "tiller-deploy";

/// Whether a release should be installed or upgraded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    Install,
    Upgrade,
}

impl ReleaseMode {
    /// `Upgrade` when the operator asked for upgrades, `Install` otherwise
    pub fn from_upgrade_flag(upgrade: bool) -> Self {
        if upgrade {
            ReleaseMode::Upgrade
        } else {
            ReleaseMode::Install
        }
    }
}

impl fmt::Display for ReleaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseMode::Install => write!(f, "install"),
            ReleaseMode::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// Everything needed to install or upgrade one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Helm repository alias or local chart directory
    pub chart_repo: String,
    /// Chart name; also the `app` label of its pods
    pub chart: String,
    pub release: String,
    pub namespace: String,
    pub values_file: Option<PathBuf>,
    pub overlays: Vec<Overlay>,
    /// Number of pods that must be running for the release to be healthy
    pub expected_instances: usize,
}

impl ReleaseDescriptor {
    pub fn new(
        chart_repo: impl Into<String>,
        chart: impl Into<String>,
        release: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            chart_repo: chart_repo.into(),
            chart: chart.into(),
            release: release.into(),
            namespace: namespace.into(),
            values_file: None,
            overlays: Vec::new(),
            expected_instances: 1,
        }
    }

    pub fn with_values_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.values_file = Some(path.into());
        self
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    pub fn with_expected_instances(mut self, count: usize) -> Self {
        self.expected_instances = count;
        self
    }

    /// `<repo>/<chart>` as passed to Helm
    pub fn chart_ref(&self) -> String {
        format!("{}/{}", self.chart_repo, self.chart)
    }

    fn values_suffix(&self) -> String {
        self.values_file
            .as_ref()
            .map(|path| format!(" -f {}", shell_words::quote(&path.to_string_lossy())))
            .unwrap_or_default()
    }

    /// `helm install` command line
    pub fn install_command(&self, overlay: &str) -> String {
        format!(
            "helm install {} -n {} --namespace {}{}{}",
            self.chart_ref(),
            self.release,
            self.namespace,
            self.values_suffix(),
            overlay
        )
    }

    /// `helm upgrade` command line
    pub fn upgrade_command(&self, overlay: &str) -> String {
        format!(
            "helm upgrade {} {}{}{}",
            self.release,
            self.chart_ref(),
            self.values_suffix(),
            overlay
        )
    }
}

/// Drives Helm for individual releases.
#[derive(Clone)]
pub struct ReleaseManager {
    executor: Arc<dyn CommandExecutor>,
    secrets: Arc<dyn SecretStore>,
    poller: ReadinessPoller,
    cancel: CancellationToken,
    bootstrap_interval: Duration,
}

impl ReleaseManager {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        secrets: Arc<dyn SecretStore>,
        readiness: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let poller = ReadinessPoller::new(executor.clone(), readiness.clone(), cancel.clone());
        Self {
            executor,
            secrets,
            poller,
            cancel,
            bootstrap_interval: readiness.interval,
        }
    }

    /// Run a command unless the run was cancelled
    async fn run(&self, command: &str) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.executor.execute(command).await
    }

    /// Make sure Helm's server side (Tiller) is installed and reachable.
    ///
    /// Does nothing beyond one `helm list` when Tiller already answers.
    /// Otherwise sets up its RBAC, runs `helm init`, makes sure the Tiller
    /// pod mounts its service account token, and waits for `helm list` to
    /// succeed. The final wait has no attempt bound; cancel the token to
    /// give up.
    pub async fn bootstrap(&self) -> Result<()> {
        match self.run("helm list").await {
            Ok(_) => {
                info!("Helm is already installed");
                return Ok(());
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) => {}
        }

        info!("Installing Tiller");
        self.run(&format!(
            "kubectl create serviceaccount {} -n {}",
            TILLER_SERVICE_ACCOUNT, TILLER_NAMESPACE
        ))
        .await?;
        self.run(&format!(
            "kubectl create clusterrolebinding {} \
             --clusterrole=cluster-admin --serviceaccount={}:{}",
            TILLER_SERVICE_ACCOUNT, TILLER_NAMESPACE, TILLER_SERVICE_ACCOUNT
        ))
        .await?;
        self.run(&format!(
            "helm init --service-account {}",
            TILLER_SERVICE_ACCOUNT
        ))
        .await?;

        self.ensure_token_mount().await?;

        let policy = PollPolicy::infinite(self.bootstrap_interval);
        poll_until(&policy, &self.cancel, "tiller", |_| async move {
            Ok(self.executor.execute("helm list").await.ok().map(|_| ()))
        })
        .await?;

        info!("Helm is ready");
        Ok(())
    }

    /// Wait for the Tiller deployment and patch `automountServiceAccountToken`
    /// when it is disabled, since Tiller needs its token to reach the API.
    async fn ensure_token_mount(&self) -> Result<()> {
        let get = format!(
            "kubectl get deploy -n {} {} \
             -o jsonpath=\"{{.spec.template.spec.automountServiceAccountToken}}\"",
            TILLER_NAMESPACE, TILLER_DEPLOYMENT
        );
        let get = get.as_str();
        let policy = PollPolicy::infinite(self.bootstrap_interval);
        let automount = poll_until(&policy, &self.cancel, TILLER_DEPLOYMENT, |_| async move {
            Ok(self.executor.execute(get).await.ok())
        })
        .await?;

        if automount == "false" {
            debug!("Enabling service account token mount on Tiller");
            self.run(&format!(
                "kubectl patch deployment -n {} {} \
                 -p '{{\"spec\": {{\"template\": {{\"spec\": {{\"automountServiceAccountToken\": true}}}}}}}}'",
                TILLER_NAMESPACE, TILLER_DEPLOYMENT
            ))
            .await?;
        }
        Ok(())
    }

    /// Whether Helm knows about `release`
    ///
    /// Only a failing `helm status` means absent; cancellation propagates.
    pub async fn release_exists(&self, release: &str) -> Result<bool> {
        match self.run(&format!("helm status {}", release)).await {
            Ok(_) => Ok(true),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(_) => Ok(false),
        }
    }

    /// Install or upgrade a release, then wait for its pods.
    pub async fn install_or_upgrade(
        &self,
        descriptor: &ReleaseDescriptor,
        mode: ReleaseMode,
    ) -> Result<()> {
        let exists = self.release_exists(&descriptor.release).await?;

        match (mode, exists) {
            (ReleaseMode::Upgrade, false) => {
                return Err(Error::precondition(format!(
                    "cannot upgrade release {}, it does not exist",
                    descriptor.release
                )));
            }
            (ReleaseMode::Install, true) => {
                info!(release = %descriptor.release, "Release already installed");
            }
            (ReleaseMode::Install, false) => {
                let overlay = self.overlay(descriptor).await?;
                info!(
                    release = %descriptor.release,
                    chart = %descriptor.chart_ref(),
                    namespace = %descriptor.namespace,
                    "Installing release"
                );
                self.run(&descriptor.install_command(&overlay)).await?;
            }
            (ReleaseMode::Upgrade, true) => {
                let overlay = self.overlay(descriptor).await?;
                info!(
                    release = %descriptor.release,
                    chart = %descriptor.chart_ref(),
                    "Upgrading release"
                );
                self.run(&descriptor.upgrade_command(&overlay)).await?;
            }
        }

        self.poller
            .check_ready(
                &descriptor.chart,
                &descriptor.release,
                &descriptor.namespace,
                descriptor.expected_instances,
            )
            .await
    }

    async fn overlay(&self, descriptor: &ReleaseDescriptor) -> Result<String> {
        assemble_overlay(
            self.secrets.as_ref(),
            &descriptor.namespace,
            &descriptor.overlays,
        )
        .await
    }
}
