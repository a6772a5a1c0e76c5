//! Certificate authorities: one PostgreSQL release and one Fabric CA release
//! per entry of the `cas` mapping.

use tracing::info;

use super::{Deployer, STABLE_REPO};
use crate::helm::{Overlay, ReleaseDescriptor, ReleaseMode};
use crate::Result;

impl Deployer {
    /// Deploy every configured CA, in name order.
    pub async fn deploy_cas(&self) -> Result<()> {
        for ca in self.settings.cas.keys() {
            self.deploy_ca(ca).await?;
        }
        Ok(())
    }

    /// Deploy the database and the CA server of a single CA.
    ///
    /// The database is always installed, never upgraded. Its generated
    /// password is fed back to the CA so both agree across reruns; on upgrade
    /// the CA's admin credentials are carried over from its own secret.
    pub async fn deploy_ca(&self, ca: &str) -> Result<()> {
        let namespace = self.settings.ca_namespace(ca)?;
        self.namespaces.ensure_namespace(&namespace).await?;
        info!(ca = %ca, namespace = %namespace, "Deploying CA");

        let postgres_release = format!("{}-pg", ca);
        let postgres =
            ReleaseDescriptor::new(STABLE_REPO, "postgresql", &postgres_release, &namespace)
                .with_values_file(self.settings.values_file("postgres-ca", &postgres_release));
        self.releases
            .install_or_upgrade(&postgres, ReleaseMode::Install)
            .await?;

        let mut server = ReleaseDescriptor::new(self.chart_repo(), "hlf-ca", ca, &namespace)
            .with_values_file(self.settings.values_file("hlf-ca", ca))
            .with_overlay(Overlay::from_secret(
                format!("{}-postgresql", postgres_release),
                "postgres-password",
                "externalDatabase.password",
            ));
        if self.mode == ReleaseMode::Upgrade {
            let admin_secret = format!("{}--ca", ca);
            server = server
                .with_overlay(Overlay::from_secret(&admin_secret, "CA_ADMIN", "adminUsername"))
                .with_overlay(Overlay::from_secret(&admin_secret, "CA_PASSWORD", "adminPassword"));
        }
        self.releases.install_or_upgrade(&server, self.mode).await
    }
}
