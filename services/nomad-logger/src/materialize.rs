//! Idempotent config file updates.
//!
//! The rendered config is compared with what is on disk and only written
//! when it differs. After a write the optional reload command is run so the
//! log shipper picks up the new file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{LoggerError, Result};

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Content on disk already matched; nothing was written.
    Unchanged,

    /// The file was rewritten, and the reload command run if one is set.
    Written { reloaded: bool },
}

impl ApplyOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Executes the reload command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` and return its combined output.
    async fn run(&self, command: &str) -> Result<String>;
}

/// Runs commands through `/bin/sh -c`.
#[derive(Debug, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<String> {
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| LoggerError::Command {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(LoggerError::Command {
                command: command.to_string(),
                reason: format!("{}: {}", output.status, combined.trim()),
            });
        }

        Ok(combined)
    }
}

/// Writes one target config file.
pub struct ConfigWriter {
    path: PathBuf,
    reload_cmd: Option<String>,
    runner: Arc<dyn CommandRunner>,
}

impl ConfigWriter {
    /// Create a writer for `path`. An empty reload command disables reloads.
    pub fn new(
        path: impl Into<PathBuf>,
        reload_cmd: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let reload_cmd = reload_cmd.into();
        Self {
            path: path.into(),
            reload_cmd: (!reload_cmd.trim().is_empty()).then_some(reload_cmd),
            runner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `content` if it differs from the file, then reload.
    ///
    /// A missing file counts as empty. The write has already happened when a
    /// reload error is returned.
    pub async fn apply(&self, content: &str) -> Result<ApplyOutcome> {
        let current = self.read_current().await?;
        if current == content.as_bytes() {
            debug!(path = %self.path.display(), "Config unchanged");
            return Ok(ApplyOutcome::Unchanged);
        }

        info!(path = %self.path.display(), bytes = content.len(), "Updating config");
        self.write(content).await?;

        let Some(command) = &self.reload_cmd else {
            return Ok(ApplyOutcome::Written { reloaded: false });
        };

        info!(command = %command, "Executing reload command");
        match self.runner.run(command).await {
            Ok(output) => {
                info!(command = %command, output = %output.trim_end(), "Reload command finished");
                Ok(ApplyOutcome::Written { reloaded: true })
            }
            Err(e) => {
                error!(command = %command, error = %e, "Reload command failed");
                Err(e)
            }
        }
    }

    async fn read_current(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(LoggerError::io(&self.path, e)),
        }
    }

    /// Write to a temp file next to the target, then rename over it.
    async fn write(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LoggerError::io(parent, e))?;
        }

        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| LoggerError::io(&tmp_path, e))?;

        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                warn!(path = %tmp_path.display(), error = %cleanup, "Failed to remove temp file");
            }
            return Err(LoggerError::io(&self.path, e));
        }

        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
