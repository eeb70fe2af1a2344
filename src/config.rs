//! Configuration loader.
//!
//! Loads configuration from:
//! 1. Default values
//! 2. `~/.plugin-store/config.yaml` in home directory
//! 3. `.plugin-store/config.yaml` in project directory
//! 4. Environment variables with `PLUGIN_STORE__` prefix

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl StoreConfig {
    /// Point the store at another plugin directory. A registry file kept inside the
    /// old directory moves along with it; one configured elsewhere stays put.
    pub fn set_plugins_dir(&mut self, dir: PathBuf) {
        if let Ok(relative) = self.registry.file.strip_prefix(&self.plugins.dir) {
            self.registry.file = dir.join(relative);
        }
        self.plugins.dir = dir;
    }
}

/// Remote plugin catalog
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub url: String,
    /// How long a fetched catalog is served before refetching
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Request timeout for the catalog and for archive downloads
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_catalog_url() -> String {
    "https://registry.nonebot.dev/plugins.json".to_string()
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            cache_ttl_secs: default_cache_ttl(),
            timeout_secs: default_http_timeout(),
        }
    }
}

/// Package index discovery and scraping
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    /// Fixed index URL, tried before asking pip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_index_url")]
    pub default_url: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,
    /// Some indexes serve different pages to browsers
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_index_url() -> String {
    crate::index_url::DEFAULT_INDEX_URL.to_string()
}

fn default_query_timeout() -> u64 {
    5
}

fn default_scrape_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "pip".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_url: default_index_url(),
            query_timeout_secs: default_query_timeout(),
            scrape_timeout_secs: default_scrape_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Plugin directory on disk
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PluginsConfig {
    #[serde(default = "default_plugins_dir")]
    pub dir: PathBuf,
    /// Check RECORD digests while extracting
    #[serde(default = "default_true")]
    pub verify_hashes: bool,
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_true() -> bool {
    true
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
            verify_hashes: true,
        }
    }
}

/// Dependency installation
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstallerConfig {
    /// Interpreter used for `pip config` queries
    #[serde(default = "default_python")]
    pub python: String,
    /// Install command; the requirements file path is appended
    #[serde(default = "default_install_command")]
    pub command: String,
    #[serde(default = "default_install_timeout")]
    pub timeout_secs: u64,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_install_command() -> String {
    "python3 -m pip install -r".to_string()
}

fn default_install_timeout() -> u64 {
    600
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            command: default_install_command(),
            timeout_secs: default_install_timeout(),
        }
    }
}

/// Installed-plugin registry file
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_file")]
    pub file: PathBuf,
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("plugins/installed.json")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            file: default_registry_file(),
        }
    }
}

/// Project-level config file
pub fn project_config_path() -> PathBuf {
    PathBuf::from(".plugin-store/config.yaml")
}

/// Load configuration from all sources
pub fn load_config() -> Result<StoreConfig, ConfigError> {
    let mut builder = Config::builder();

    // Set defaults
    builder = builder
        .set_default("catalog.url", default_catalog_url())?
        .set_default("catalog.cache_ttl_secs", default_cache_ttl())?
        .set_default("catalog.timeout_secs", default_http_timeout())?
        .set_default("index.default_url", default_index_url())?
        .set_default("plugins.dir", "plugins")?
        .set_default("installer.python", default_python())?;

    // Load from home directory config file
    if let Some(home) = dirs::home_dir() {
        let home_config: PathBuf = home.join(".plugin-store/config.yaml");
        if home_config.exists() {
            builder = builder.add_source(File::from(home_config).required(false));
        }
    }

    // Load from project config file
    let project_config = project_config_path();
    if project_config.exists() {
        builder = builder.add_source(File::from(project_config).required(false));
    }

    // e.g., PLUGIN_STORE__PLUGINS__DIR=/srv/bot/plugins
    builder = builder.add_source(
        Environment::with_prefix("PLUGIN_STORE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.catalog.url, "https://registry.nonebot.dev/plugins.json");
        assert_eq!(config.catalog.cache_ttl_secs, 60);
        assert_eq!(config.index.default_url, "https://pypi.org/simple/");
        assert_eq!(config.index.query_timeout_secs, 5);
        assert_eq!(config.index.scrape_timeout_secs, 10);
        assert_eq!(config.index.user_agent, "pip");
        assert!(config.index.url.is_none());
        assert_eq!(config.plugins.dir, PathBuf::from("plugins"));
        assert!(config.plugins.verify_hashes);
        assert_eq!(config.installer.timeout_secs, 600);
    }

    #[test]
    fn test_plugins_dir_override_moves_default_registry() {
        let mut config = StoreConfig::default();
        config.set_plugins_dir(PathBuf::from("/srv/bot/plugins"));
        assert_eq!(config.plugins.dir, PathBuf::from("/srv/bot/plugins"));
        assert_eq!(
            config.registry.file,
            PathBuf::from("/srv/bot/plugins/installed.json")
        );
    }

    #[test]
    fn test_plugins_dir_override_keeps_external_registry() {
        let mut config = StoreConfig::default();
        config.registry.file = PathBuf::from("/var/lib/bot/installed.json");
        config.set_plugins_dir(PathBuf::from("/srv/bot/plugins"));
        assert_eq!(
            config.registry.file,
            PathBuf::from("/var/lib/bot/installed.json")
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
plugins:
  dir: /srv/bot/plugins
index:
  url: https://mirror.example/simple
"#;
        let config: StoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.plugins.dir, PathBuf::from("/srv/bot/plugins"));
        assert!(config.plugins.verify_hashes);
        assert_eq!(
            config.index.url.as_deref(),
            Some("https://mirror.example/simple")
        );
        assert_eq!(config.index.scrape_timeout_secs, 10);
        assert_eq!(config.catalog.cache_ttl_secs, 60);
        assert_eq!(config.installer.command, "python3 -m pip install -r");
    }

    #[test]
    fn test_yaml_round_trip_of_defaults() {
        let yaml = serde_yaml::to_string(&StoreConfig::default()).unwrap();
        assert!(yaml.contains("cache_ttl_secs: 60"));
        assert!(!yaml.contains("url: null"));
        let back: StoreConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.registry.file, PathBuf::from("plugins/installed.json"));
    }
}
