//! Privileged command execution and atomic file replacement.

use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("command '{command}' exited with status {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Runs commands on behalf of the driver, typically with elevated privileges.
pub trait CommandExecutor: Send + Sync {
    /// Run a command and return its standard output.
    ///
    /// With `check_exit_code` set, a non-zero exit status is an error.
    fn execute(&self, cmd: &[String], check_exit_code: bool) -> Result<String, ExecError>;
}

/// Executes commands through a root helper such as `sudo`.
#[derive(Debug, Clone, Default)]
pub struct RootHelperExecutor {
    root_helper: Vec<String>,
}

impl RootHelperExecutor {
    /// Build from a shell-style root helper string, e.g. `sudo -n`.
    ///
    /// An empty string runs commands directly.
    pub fn from_shell(root_helper: &str) -> Result<Self, shell_words::ParseError> {
        Ok(Self {
            root_helper: shell_words::split(root_helper)?,
        })
    }

    pub fn root_helper(&self) -> &[String] {
        &self.root_helper
    }
}

impl CommandExecutor for RootHelperExecutor {
    fn execute(&self, cmd: &[String], check_exit_code: bool) -> Result<String, ExecError> {
        let full: Vec<&String> = self.root_helper.iter().chain(cmd.iter()).collect();
        let (program, args) = full.split_first().ok_or(ExecError::EmptyCommand)?;
        let command = shell_words::join(full.iter().map(|s| s.as_str()));

        debug!(command = %command, "running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ExecError::Spawn {
                command: command.clone(),
                source,
            })?;

        if check_exit_code && !output.status.success() {
            return Err(ExecError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Build an owned command line from string slices.
pub fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Atomically replace `path` with `content`.
///
/// The data is written to a temporary file in the same directory and renamed
/// over the target, so readers never see a partial file.
pub fn replace_file(path: &Path, content: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
