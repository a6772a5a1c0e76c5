//! Genesis block and channel transaction, generated with `configtxgen` in
//! `core.dir_config` and stored as secrets for the orderer and peer charts.

use std::collections::BTreeMap;

use tracing::info;

use super::Deployer;
use crate::Result;

/// A file under `core.dir_config` stored in a secret under its file name
pub(super) struct Artifact<'a> {
    pub(super) secret: &'a str,
    pub(super) namespace: String,
    pub(super) file_name: String,
    /// Run in `core.dir_config` to produce the file; `None` for files that
    /// already exist
    pub(super) command: Option<String>,
}

impl Deployer {
    /// Generate whatever artifacts the configured sections need.
    ///
    /// An artifact whose secret already exists is not regenerated.
    pub async fn generate_crypto(&self) -> Result<()> {
        if let Some(orderers) = &self.settings.orderers {
            self.store_artifact(Artifact {
                secret: &orderers.secret_genesis,
                namespace: self.settings.msp_namespace(&orderers.msp)?,
                file_name: "genesis.block".to_string(),
                command: Some(format!(
                    "configtxgen -profile {} -outputBlock genesis.block",
                    shell_words::quote(&orderers.genesis_profile)
                )),
            })
            .await?;
        }

        if let Some(peers) = &self.settings.peers {
            let file_name = format!("{}.tx", peers.channel_name);
            self.store_artifact(Artifact {
                secret: &peers.secret_channel,
                namespace: self.settings.msp_namespace(&peers.msp)?,
                command: Some(format!(
                    "configtxgen -profile {} -channelID {} -outputCreateChannelTx {}",
                    shell_words::quote(&peers.channel_profile),
                    shell_words::quote(&peers.channel_name),
                    shell_words::quote(&file_name)
                )),
                file_name,
            })
            .await?;
        }
        Ok(())
    }

    pub(super) async fn store_artifact(&self, artifact: Artifact<'_>) -> Result<()> {
        self.namespaces.ensure_namespace(&artifact.namespace).await?;

        if self.secrets.exists(artifact.secret, &artifact.namespace).await? {
            info!(
                secret = %artifact.secret,
                namespace = %artifact.namespace,
                "Artifact already stored"
            );
            return Ok(());
        }

        let dir = &self.settings.core.dir_config;
        if let Some(command) = &artifact.command {
            let dir_arg = shell_words::quote(&dir.to_string_lossy()).into_owned();
            self.run(&format!("cd {} && {}", dir_arg, command)).await?;
        }
        let content = tokio::fs::read(dir.join(&artifact.file_name)).await?;

        self.secrets
            .create(
                artifact.secret,
                &artifact.namespace,
                BTreeMap::from([(artifact.file_name, content)]),
            )
            .await
    }
}
