//! fabricctl - Helm-driven installer for Hyperledger Fabric networks
//!
//! Installs certificate authorities, orderers and peers onto a running
//! Kubernetes cluster by driving `helm install` / `helm upgrade` for every
//! component and waiting until its pods are running.
//!
//! # Modules
//!
//! - [`config`] - Settings document and namespace resolution
//! - [`cluster`] - Kube context, secrets and namespaces
//! - [`exec`] - External command execution
//! - [`poll`] - Bounded, cancellable polling
//! - [`helm`] - Release install/upgrade, value overlays, readiness
//! - [`fabric`] - Component recipes (CA, orderer, peer, crypto)
//! - [`commands`] - CLI command handlers
//! - [`error`] - Error types

pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod fabric;
pub mod helm;
pub mod poll;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// fabricctl - Deploy a Hyperledger Fabric network with Helm
#[derive(Parser, Debug)]
#[command(name = "fabricctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Settings YAML describing the network
    #[arg(
        short = 'f',
        long = "settings-file",
        env = "FABRICCTL_SETTINGS",
        global = true,
        default_value = "settings.yaml"
    )]
    pub settings_file: PathBuf,

    /// Upgrade existing releases instead of installing them
    #[arg(short, long, global = true)]
    pub upgrade: bool,

    /// Debug logging, and dump the parsed settings
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to kubeconfig (defaults to KUBECONFIG, then ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Readiness checks per release before giving up (0 = wait forever)
    #[arg(
        long,
        env = "FABRICCTL_READY_ATTEMPTS",
        global = true,
        default_value_t = poll::DEFAULT_MAX_ATTEMPTS
    )]
    pub ready_attempts: u32,

    /// Seconds between readiness checks
    #[arg(
        long,
        env = "FABRICCTL_READY_INTERVAL_SECS",
        global = true,
        default_value_t = poll::DEFAULT_INTERVAL.as_secs()
    )]
    pub ready_interval_secs: u64,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Load and validate the settings file
    Settings,
    #[command(flatten)]
    Deploy(DeployCommand),
}

/// Commands that talk to the cluster
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployCommand {
    /// Install Helm's server side (Tiller) if it is missing
    Init,
    /// Deploy certificate authorities
    Ca,
    /// Generate the genesis block and channel transaction
    Crypto,
    /// Deploy Kafka (when configured) and the orderers
    Orderer,
    /// Deploy CouchDB and the peers
    Peer,
    /// Deploy Hyperledger Composer next to the peers
    Composer,
    /// Deploy the whole network: CAs, crypto, orderers, peers
    Fabric,
    /// Deploy the Fabric network followed by Composer
    Deploy,
}

impl Cli {
    /// Run the CLI command until it completes or `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        commands::run(self.command, &self.global, cancel).await
    }
}
