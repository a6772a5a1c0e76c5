//! Ordering service: optional Kafka cluster plus one `hlf-ord` release per
//! orderer name.

use tracing::info;

use super::{Deployer, INCUBATOR_REPO};
use crate::helm::{ReleaseDescriptor, ReleaseMode};
use crate::{Error, Result};

const KAFKA_RELEASE: &str = "kafka-hlf";

impl Deployer {
    pub async fn deploy_orderers(&self) -> Result<()> {
        let orderers = self
            .settings
            .orderers
            .as_ref()
            .ok_or_else(|| Error::validation("settings have no orderers section"))?;
        let namespace = self.settings.msp_namespace(&orderers.msp)?;
        self.namespaces.ensure_namespace(&namespace).await?;

        if let Some(kafka) = &orderers.kafka {
            info!(namespace = %namespace, brokers = kafka.pod_num, "Deploying Kafka");
            let descriptor =
                ReleaseDescriptor::new(INCUBATOR_REPO, "kafka", KAFKA_RELEASE, &namespace)
                    .with_values_file(self.settings.values_file("kafka", KAFKA_RELEASE))
                    .with_expected_instances(kafka.pod_num);
            self.releases
                .install_or_upgrade(&descriptor, ReleaseMode::Install)
                .await?;
        }

        for name in &orderers.names {
            info!(orderer = %name, namespace = %namespace, "Deploying orderer");
            let descriptor = ReleaseDescriptor::new(self.chart_repo(), "hlf-ord", name, &namespace)
                .with_values_file(self.settings.values_file("hlf-ord", name));
            self.releases
                .install_or_upgrade(&descriptor, self.mode)
                .await?;
        }
        Ok(())
    }
}
