//! Settings command

use tracing::info;

use crate::config::Settings;
use crate::Result;

/// Report a successfully loaded settings file; dump it as JSON when verbose.
pub fn run(settings: &Settings, verbose: bool) -> Result<()> {
    info!(
        namespace = %settings.core.namespace,
        cas = settings.cas.len(),
        msps = settings.msps.len(),
        "Settings successfully loaded"
    );
    if verbose {
        println!("{}", render(settings)?);
    }
    Ok(())
}

fn render(settings: &Settings) -> Result<String> {
    Ok(serde_json::to_string_pretty(settings)?)
}
