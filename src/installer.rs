//! Dependency installation.
//!
//! The store hands a generated `requirements.txt` to a [`DependencyInstaller`] and only
//! looks at whether it succeeded.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::InstallerConfig;
use crate::error::StoreError;

/// Installs the packages listed in a requirements file
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, requirements: &Path) -> Result<(), StoreError>;
}

/// Runs an external command with the requirements path appended
#[derive(Debug, Clone)]
pub struct PipInstaller {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl PipInstaller {
    /// Split `command` into words the way a POSIX shell would
    pub fn new(command: &str, timeout: Duration) -> Result<Self, StoreError> {
        let mut words = shlex::split(command)
            .filter(|words| !words.is_empty())
            .ok_or_else(|| StoreError::Installer(format!("invalid install command: {command:?}")))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| StoreError::Installer("empty install command".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
            timeout,
        })
    }

    pub fn from_config(config: &InstallerConfig) -> Result<Self, StoreError> {
        Self::new(&config.command, Duration::from_secs(config.timeout_secs))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl DependencyInstaller for PipInstaller {
    async fn install(&self, requirements: &Path) -> Result<(), StoreError> {
        info!(program = %self.program, requirements = ?requirements, "Installing plugin dependencies");
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(requirements)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StoreError::Installer(format!("failed to start {}: {}", self.program, e)))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(StoreError::Installer(e.to_string())),
            Err(_) => {
                return Err(StoreError::Installer(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            debug!(stdout = %stdout, "Installer output");
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StoreError::Installer(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_command_splitting() {
        let installer =
            PipInstaller::new("python3 -m pip install -r", Duration::from_secs(1)).unwrap();
        assert_eq!(installer.program(), "python3");
        assert_eq!(installer.args(), ["-m", "pip", "install", "-r"]);

        let quoted =
            PipInstaller::new("'/opt/my venv/bin/pip' install -r", Duration::from_secs(1)).unwrap();
        assert_eq!(quoted.program(), "/opt/my venv/bin/pip");
    }

    #[test]
    fn test_invalid_commands() {
        assert!(PipInstaller::new("", Duration::from_secs(1)).is_err());
        assert!(PipInstaller::new("pip 'unterminated", Duration::from_secs(1)).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_is_reported() {
        let dir = TempDir::new().unwrap();
        let requirements = dir.path().join("requirements.txt");
        std::fs::write(&requirements, "httpx\n").unwrap();

        let ok = PipInstaller::new("true", Duration::from_secs(5)).unwrap();
        ok.install(&requirements).await.unwrap();

        let failing = PipInstaller::new("false", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            failing.install(&requirements).await,
            Err(StoreError::Installer(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let installer =
            PipInstaller::new("definitely-not-an-installer -r", Duration::from_secs(5)).unwrap();
        let err = installer
            .install(Path::new("requirements.txt"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
