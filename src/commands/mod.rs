//! CLI commands

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::{KubeCluster, KubeconfigContext};
use crate::config::load_config;
use crate::exec::ShellExecutor;
use crate::fabric::Deployer;
use crate::helm::ReleaseMode;
use crate::poll::PollPolicy;
use crate::{Commands, DeployCommand, GlobalArgs, Result};

pub mod settings;

/// Readiness policy from the command line flags
pub fn readiness_policy(args: &GlobalArgs) -> PollPolicy {
    PollPolicy {
        max_attempts: args.ready_attempts,
        interval: Duration::from_secs(args.ready_interval_secs),
    }
}

/// Load settings, connect to the cluster and run `command`.
///
/// The settings file is re-read on every invocation.
pub async fn run(command: Commands, args: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let context = KubeconfigContext::new(args.kubeconfig.clone());
    let settings = load_config(&args.settings_file, &context)?;

    let command = match command {
        Commands::Settings => return settings::run(&settings, args.verbose),
        Commands::Deploy(command) => command,
    };

    let cluster = Arc::new(KubeCluster::connect(args.kubeconfig.as_deref()).await?);
    let deployer = Deployer::new(
        settings,
        Arc::new(ShellExecutor::new()),
        cluster.clone(),
        cluster,
        cancel,
    )
    .with_mode(ReleaseMode::from_upgrade_flag(args.upgrade))
    .with_readiness(readiness_policy(args));

    dispatch(command, &deployer).await
}

/// Run a deployment command against an assembled [`Deployer`]
pub async fn dispatch(command: DeployCommand, deployer: &Deployer) -> Result<()> {
    let outcome = match command {
        DeployCommand::Init => deployer.init().await,
        DeployCommand::Ca => {
            deployer.init().await?;
            deployer.deploy_cas().await
        }
        DeployCommand::Crypto => deployer.generate_crypto().await,
        DeployCommand::Orderer => {
            deployer.init().await?;
            deployer.deploy_orderers().await
        }
        DeployCommand::Peer => {
            deployer.init().await?;
            deployer.deploy_peers().await
        }
        DeployCommand::Composer => {
            deployer.init().await?;
            deployer.deploy_composer().await
        }
        DeployCommand::Fabric => deployer.deploy_network().await,
        DeployCommand::Deploy => deployer.deploy_all().await,
    };
    outcome?;

    info!(command = ?command, "Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::exec::fake::ScriptedExecutor;
    use crate::fabric::test_support::{deployer, secrets, settings};
    use crate::Cli;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fabricctl",
            "peer",
            "-f",
            "network.yaml",
            "--upgrade",
            "--ready-attempts",
            "5",
            "--ready-interval-secs",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.command, Commands::Deploy(DeployCommand::Peer));
        assert!(cli.global.upgrade);
        assert_eq!(cli.global.settings_file.to_str(), Some("network.yaml"));
        assert_eq!(
            readiness_policy(&cli.global),
            PollPolicy {
                max_attempts: 5,
                interval: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn readiness_defaults_are_bounded() {
        let cli = Cli::try_parse_from(["fabricctl", "-f", "s.yaml", "init"]).unwrap();
        assert_eq!(readiness_policy(&cli.global), PollPolicy::default());
        assert!(!cli.global.upgrade);
    }

    #[test]
    fn settings_and_deploy_commands_are_distinct() {
        let parse = |name: &str| Cli::try_parse_from(["fabricctl", name]).unwrap().command;
        assert_eq!(parse("settings"), Commands::Settings);
        assert_eq!(parse("composer"), Commands::Deploy(DeployCommand::Composer));
        assert_eq!(parse("deploy"), Commands::Deploy(DeployCommand::Deploy));
        assert_eq!(parse("fabric"), Commands::Deploy(DeployCommand::Fabric));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["fabricctl", "channel"]).is_err());
    }

    #[tokio::test]
    async fn init_dispatch_only_bootstraps() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().ok(""));
        let deployer = deployer(
            settings(dir.path()),
            executor.clone(),
            secrets(&[]),
            ReleaseMode::Install,
        );

        dispatch(DeployCommand::Init, &deployer).await.unwrap();
        assert_eq!(executor.commands(), vec!["helm list"]);
    }

    #[tokio::test]
    async fn composer_dispatch_bootstraps_before_deploying() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().ok(""));
        let deployer = deployer(
            settings(dir.path()),
            executor.clone(),
            secrets(&[]),
            ReleaseMode::Install,
        );

        // No composer section: Helm is checked, nothing is deployed
        let err = dispatch(DeployCommand::Composer, &deployer)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Validation(_)));
        assert_eq!(executor.commands(), vec!["helm list"]);
    }
}
