//! Release readiness checks.
//!
//! A release is ready when exactly the expected number of its pods are
//! `Running`. Phases and pod names come from two separate kubectl queries,
//! so both sequences have to agree on the count independently.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::exec::CommandExecutor;
use crate::poll::{poll_until, PollPolicy};
use crate::Result;

/// Terminal-success pod phase
const RUNNING_PHASE: &str = "Running";

/// Pod state observed by one poll attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub phases: Vec<String>,
    pub pods: Vec<String>,
}

impl ReadinessSnapshot {
    fn parse(phases: &str, pods: &str) -> Self {
        Self {
            phases: phases.split_whitespace().map(str::to_string).collect(),
            pods: pods.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Exactly `expected` pods, all running. More pods than expected is not
    /// ready either: it usually means a rollout is still replacing pods.
    pub fn is_ready(&self, expected: usize) -> bool {
        self.phases.len() == expected
            && self.pods.len() == expected
            && self.phases.iter().all(|phase| phase == RUNNING_PHASE)
    }
}

/// Polls pod state of a release until it is ready.
#[derive(Clone)]
pub struct ReadinessPoller {
    executor: Arc<dyn CommandExecutor>,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl ReadinessPoller {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            policy,
            cancel,
        }
    }

    /// Block until `expected` pods labelled `app=<app_label>,release=<release>`
    /// are running in `namespace`.
    ///
    /// Failing status queries count as "not ready yet". Returns
    /// [`crate::Error::ReadinessTimeout`] once the attempt budget is spent.
    pub async fn check_ready(
        &self,
        app_label: &str,
        release: &str,
        namespace: &str,
        expected: usize,
    ) -> Result<()> {
        info!(
            release = %release,
            namespace = %namespace,
            expected,
            "Ensuring that all pods are running"
        );

        poll_until(&self.policy, &self.cancel, release, |_attempt| async move {
            let snapshot = self.snapshot(app_label, release, namespace).await;
            Ok(snapshot.filter(|s| s.is_ready(expected)).map(|_| ()))
        })
        .await?;

        info!(release = %release, "All pods in release are running");
        Ok(())
    }

    async fn snapshot(
        &self,
        app_label: &str,
        release: &str,
        namespace: &str,
    ) -> Option<ReadinessSnapshot> {
        let phases = self
            .query(app_label, release, namespace, "{.items[*].status.phase}")
            .await?;
        let pods = self
            .query(app_label, release, namespace, "{.items[*].metadata.name}")
            .await?;
        Some(ReadinessSnapshot::parse(&phases, &pods))
    }

    async fn query(
        &self,
        app_label: &str,
        release: &str,
        namespace: &str,
        jsonpath: &str,
    ) -> Option<String> {
        let command = pod_query(app_label, release, namespace, jsonpath);
        match self.executor.execute(&command).await {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(release = %release, error = %e, "Pod status query failed");
                None
            }
        }
    }
}

fn pod_query(app_label: &str, release: &str, namespace: &str, jsonpath: &str) -> String {
    format!(
        "kubectl get pods -n {} -l \"app={},release={}\" -o jsonpath=\"{}\"",
        namespace, app_label, release, jsonpath
    )
}
