//! Store errors and operation outcomes.
//!
//! Expected conditions (unknown identifier, already installed, already latest, ...)
//! are reported as an [`Outcome`] rather than an error. Only malformed artifacts and
//! external failures travel as [`StoreError`].

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Plugin not found: no package or name matches '{0}'")]
    NotFound(String),

    #[error("Identifier '{identifier}' matches several plugins: {}", modules.join(", "))]
    AmbiguousIdentifier {
        identifier: String,
        modules: Vec<String>,
    },

    #[error("No installable wheel found for plugin {0}")]
    DownloadUnavailable(String),

    #[error("Invalid wheel archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Wheel has no RECORD file under a .dist-info directory")]
    ManifestMissing,

    #[error("Extracted plugin has no __init__.py: {0}")]
    MissingPackageMarker(PathBuf),

    #[error("Integrity check failed for {0}")]
    IntegrityMismatch(String),

    #[error("Refusing to extract unsafe path: {0}")]
    UnsafePath(String),

    #[error("Page {page} is out of range ({total} pages)")]
    OutOfRange { page: usize, total: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dependency installation failed: {0}")]
    Installer(String),

    #[error("Installed registry error: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Io(std::io::Error::other(e))
    }
}

/// Terminal state of a single-plugin operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed { name: String },
    AlreadyInstalled { name: String },
    Removed { name: String },
    NotPresent { name: String },
    Updated { name: String },
    NotInstalled { name: String },
    AlreadyLatest { name: String },
    NotFound { identifier: String },
    Ambiguous { identifier: String, modules: Vec<String> },
}

impl Outcome {
    /// Whether the operation changed anything on disk
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Installed { .. } | Self::Removed { .. } | Self::Updated { .. }
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { name } => write!(
                f,
                "Plugin {} installed successfully! Restart to take effect",
                name
            ),
            Self::AlreadyInstalled { name } => {
                write!(f, "Plugin {} is already installed, nothing to do", name)
            }
            Self::Removed { name } => write!(
                f,
                "Plugin {} removed successfully! Restart to take effect",
                name
            ),
            Self::NotPresent { name } => write!(f, "Plugin {} is not present on disk", name),
            Self::Updated { name } => write!(
                f,
                "Plugin {} updated successfully! Restart to take effect",
                name
            ),
            Self::NotInstalled { name } => {
                write!(f, "Plugin {} is not installed, cannot update", name)
            }
            Self::AlreadyLatest { name } => {
                write!(f, "Plugin {} is already the latest version", name)
            }
            Self::NotFound { identifier } => {
                write!(f, "No plugin matches package or name '{}'", identifier)
            }
            Self::Ambiguous {
                identifier,
                modules,
            } => write!(
                f,
                "'{}' is ambiguous, it matches: {}",
                identifier,
                modules.join(", ")
            ),
        }
    }
}

/// Result of a bulk update: display names per bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl UpdateReport {
    /// Number of plugins an update was attempted for
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempted() == 0 {
            return write!(f, "All plugins are already up to date");
        }
        write!(
            f,
            "--Updated {} plugins, {} failed, {} succeeded--",
            self.attempted(),
            self.failed.len(),
            self.succeeded.len()
        )?;
        if !self.succeeded.is_empty() {
            write!(
                f,
                "\n* Updated successfully:\n\t- {}",
                self.succeeded.join("\n\t- ")
            )?;
        }
        if !self.failed.is_empty() {
            write!(f, "\n* Failed to update:\n\t- {}", self.failed.join("\n\t- "))?;
        }
        write!(f, "\nRestart to take effect")
    }
}
