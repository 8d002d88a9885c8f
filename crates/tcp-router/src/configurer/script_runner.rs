//! Reload script execution.

use crate::configurer::ScriptRunner;
use crate::errors::ScriptError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Runs an executable with no arguments and waits for it to exit.
#[derive(Debug, Clone)]
pub struct CommandScriptRunner {
    path: PathBuf,
}

impl CommandScriptRunner {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScriptRunner for CommandScriptRunner {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn run(&self) -> Result<(), ScriptError> {
        let path = self.path.display().to_string();

        let output = Command::new(&self.path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScriptError::Spawn {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ScriptError::NonZeroExit {
                path,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(target: "tcp_router.configurer", "Reload script finished");
        Ok(())
    }
}
