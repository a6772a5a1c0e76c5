//! External command execution
//!
//! Helm and kubectl are driven through their command lines. Everything that
//! shells out goes through [`CommandExecutor`] so command sequences can be
//! asserted in tests without touching a cluster.

use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Runs one external command line to completion.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` and return its trimmed standard output.
    ///
    /// A non-zero exit is reported as [`Error::Execution`] carrying stderr.
    async fn execute(&self, command: &str) -> Result<String>;
}

/// [`CommandExecutor`] running commands through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> Result<String> {
        debug!(command = %command, "Executing");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::execution(command, format!("failed to spawn: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::execution(
                command,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(command = %command, output = %stdout, "Command succeeded");
        Ok(stdout)
    }
}
