//! Store manager.
//!
//! Resolves identifiers against the catalog, reconciles the catalog with the
//! installed map, and drives the add / remove / update flows. Expected conditions
//! come back as an [`Outcome`]; only artifact and infrastructure failures are errors.
//!
//! Plugins are processed one at a time. The plugin tree and the external installer
//! are shared state with no locking of their own.

use reqwest::Client;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, PluginDescriptor};
use crate::config::StoreConfig;
use crate::error::{Outcome, StoreError, UpdateReport};
use crate::installer::{DependencyInstaller, PipInstaller};
use crate::registry::{InstalledCache, InstalledRegistry, JsonFileRegistry};
use crate::simple_index::WheelLocator;
use crate::staging::{StagedPlugin, REQUIREMENTS_FILE};
use crate::version::{versions_equal, VersionKey};

// ---------------------------------------------------------------------------
// Listing types
// ---------------------------------------------------------------------------

/// Catalog field to sort listings by, always descending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Time,
    Name,
    Author,
    Module,
    Version,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "time" => Ok(Self::Time),
            "name" => Ok(Self::Name),
            "author" => Ok(Self::Author),
            "module" | "module_name" => Ok(Self::Module),
            "version" => Ok(Self::Version),
            other => Err(format!(
                "unknown sort field '{}' (expected time, name, author, module or version)",
                other
            )),
        }
    }
}

impl SortField {
    fn compare(self, a: &PluginDescriptor, b: &PluginDescriptor) -> Ordering {
        match self {
            Self::Time => a.updated_at().cmp(&b.updated_at()),
            Self::Name => a.name.cmp(&b.name),
            Self::Author => a.author.cmp(&b.author),
            Self::Module => a.module_name.cmp(&b.module_name),
            Self::Version => VersionKey::parse(&a.version).cmp(&VersionKey::parse(&b.version)),
        }
    }
}

/// Parameters of a listing request
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// 1-based
    pub page: usize,
    pub page_size: usize,
    pub order_by: SortField,
    /// Case-insensitive substring over name, author and description
    pub filter: Option<String>,
    /// Only installed plugins whose catalog version differs
    pub only_show_update: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            order_by: SortField::Time,
            filter: None,
            only_show_update: false,
        }
    }
}

/// A catalog entry joined with its installed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRow {
    pub plugin: PluginDescriptor,
    pub installed_version: Option<String>,
}

impl PluginRow {
    pub fn is_installed(&self) -> bool {
        self.installed_version.is_some()
    }

    /// Installed, and the catalog version is a different string
    pub fn has_update(&self) -> bool {
        self.installed_version
            .as_deref()
            .is_some_and(|installed| !versions_equal(installed, &self.plugin.version))
    }

    /// Catalog version, or `installed (update -> catalog)` when outdated
    pub fn version_label(&self) -> String {
        match self.installed_version.as_deref() {
            Some(installed) if self.has_update() => {
                format!("{} (update -> {})", installed, self.plugin.version)
            }
            _ => self.plugin.version.clone(),
        }
    }
}

/// One page of listing rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPage {
    pub rows: Vec<PluginRow>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOutcome {
    Page(PluginPage),
    OutOfRange { page: usize, total: usize },
}

impl ListOutcome {
    pub fn into_page(self) -> Result<PluginPage, StoreError> {
        match self {
            Self::Page(page) => Ok(page),
            Self::OutOfRange { page, total } => Err(StoreError::OutOfRange { page, total }),
        }
    }
}

// ---------------------------------------------------------------------------
// Store manager
// ---------------------------------------------------------------------------

/// Convert identifier-resolution failures into outcomes, pass everything else on
fn resolution_outcome(err: StoreError) -> Result<Outcome, StoreError> {
    match err {
        StoreError::NotFound(identifier) => Ok(Outcome::NotFound { identifier }),
        StoreError::AmbiguousIdentifier {
            identifier,
            modules,
        } => Ok(Outcome::Ambiguous {
            identifier,
            modules,
        }),
        other => Err(other),
    }
}

pub struct StoreManager {
    config: StoreConfig,
    http: Client,
    catalog: Catalog,
    installed: InstalledCache,
    locator: WheelLocator,
    installer: Arc<dyn DependencyInstaller>,
}

impl StoreManager {
    pub fn new(
        config: StoreConfig,
        registry: Arc<dyn InstalledRegistry>,
        installer: Arc<dyn DependencyInstaller>,
    ) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.catalog.timeout_secs))
            .user_agent(concat!("plugin-store/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let catalog = Catalog::new(
            http.clone(),
            config.catalog.url.clone(),
            Duration::from_secs(config.catalog.cache_ttl_secs),
        );
        let locator = WheelLocator::from_config(http.clone(), &config);

        Ok(Self {
            config,
            http,
            catalog,
            installed: InstalledCache::new(registry),
            locator,
            installer,
        })
    }

    /// Manager backed by the configured registry file and install command
    pub fn from_config(config: StoreConfig) -> Result<Self, StoreError> {
        let registry = Arc::new(JsonFileRegistry::new(config.registry.file.clone()));
        let installer = Arc::new(PipInstaller::from_config(&config.installer)?);
        Self::new(config, registry, installer)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn installed(&self) -> &InstalledCache {
        &self.installed
    }

    pub fn plugins_root(&self) -> &Path {
        &self.config.plugins.dir
    }

    pub fn plugin_dir(&self, module_name: &str) -> PathBuf {
        self.plugins_root().join(module_name)
    }

    // -- listing ------------------------------------------------------------

    async fn rows(
        &self,
        filter: Option<&str>,
        order_by: SortField,
    ) -> Result<Vec<PluginRow>, StoreError> {
        let plugins = self.catalog.plugins().await?;
        let installed = self.installed.get().await?;

        let mut rows: Vec<PluginRow> = plugins
            .iter()
            .filter(|p| filter.is_none_or(|q| p.matches_query(q)))
            .map(|p| PluginRow {
                plugin: p.clone(),
                installed_version: installed.get(&p.module_name).cloned(),
            })
            .collect();
        rows.sort_by(|a, b| order_by.compare(&b.plugin, &a.plugin));
        Ok(rows)
    }

    /// One page of the catalog with installed state
    pub async fn list(&self, query: &ListQuery) -> Result<ListOutcome, StoreError> {
        let mut rows = self.rows(query.filter.as_deref(), query.order_by).await?;
        if query.only_show_update {
            rows.retain(PluginRow::has_update);
        }

        let page_size = query.page_size.max(1);
        let total_items = rows.len();
        let total_pages = total_items.div_ceil(page_size);
        if query.page == 0 || query.page > total_pages {
            debug!(page = query.page, total = total_pages, "Listing page out of range");
            return Ok(ListOutcome::OutOfRange {
                page: query.page,
                total: total_pages,
            });
        }

        let rows = rows
            .into_iter()
            .skip((query.page - 1) * page_size)
            .take(page_size)
            .collect();
        Ok(ListOutcome::Page(PluginPage {
            rows,
            page: query.page,
            total_pages,
            total_items,
        }))
    }

    /// Every row matching `query`, newest first
    pub async fn search(&self, query: &str) -> Result<Vec<PluginRow>, StoreError> {
        self.rows(Some(query), SortField::Time).await
    }

    // -- resolution ---------------------------------------------------------

    /// Catalog entry whose distribution, display or module name equals `identifier`
    pub async fn resolve(&self, identifier: &str) -> Result<PluginDescriptor, StoreError> {
        let plugins = self.catalog.plugins().await?;
        let matches: Vec<&PluginDescriptor> = plugins
            .iter()
            .filter(|p| {
                p.project_link == identifier || p.name == identifier || p.module_name == identifier
            })
            .collect();

        let modules: BTreeSet<&str> = matches.iter().map(|p| p.module_name.as_str()).collect();
        match (matches.first(), modules.len()) {
            (None, _) => Err(StoreError::NotFound(identifier.to_string())),
            (Some(plugin), 1) => Ok((*plugin).clone()),
            _ => Err(StoreError::AmbiguousIdentifier {
                identifier: identifier.to_string(),
                modules: modules.into_iter().map(str::to_string).collect(),
            }),
        }
    }

    // -- operations ---------------------------------------------------------

    /// Install a plugin unless the installed map already has it
    pub async fn add(&self, identifier: &str) -> Result<Outcome, StoreError> {
        let plugin = match self.resolve(identifier).await {
            Ok(plugin) => plugin,
            Err(e) => return resolution_outcome(e),
        };
        let installed = self.installed.get().await?;
        if installed.contains_key(&plugin.module_name) {
            info!(plugin = %plugin.name, "Plugin already installed");
            return Ok(Outcome::AlreadyInstalled { name: plugin.name });
        }
        if self.plugin_dir(&plugin.module_name).exists() {
            warn!(
                plugin = %plugin.name,
                dir = ?self.plugin_dir(&plugin.module_name),
                "Replacing plugin directory unknown to the registry"
            );
        }

        self.install(&plugin).await?;
        Ok(Outcome::Installed { name: plugin.name })
    }

    /// Delete a plugin's directory
    pub async fn remove(&self, identifier: &str) -> Result<Outcome, StoreError> {
        let plugin = match self.resolve(identifier).await {
            Ok(plugin) => plugin,
            Err(e) => return resolution_outcome(e),
        };
        let dir = self.plugin_dir(&plugin.module_name);
        if !tokio::fs::try_exists(&dir).await? {
            info!(plugin = %plugin.name, dir = ?dir, "Plugin directory not present");
            return Ok(Outcome::NotPresent { name: plugin.name });
        }

        tokio::fs::remove_dir_all(&dir).await?;
        self.installed
            .registry()
            .record_removal(&plugin.module_name)
            .await?;
        self.installed.invalidate().await;
        info!(plugin = %plugin.name, dir = ?dir, "Removed plugin");
        Ok(Outcome::Removed { name: plugin.name })
    }

    /// Reinstall an installed plugin whose catalog version differs
    pub async fn update(&self, identifier: &str) -> Result<Outcome, StoreError> {
        let plugin = match self.resolve(identifier).await {
            Ok(plugin) => plugin,
            Err(e) => return resolution_outcome(e),
        };
        let installed = self.installed.get().await?;
        let Some(current) = installed.get(&plugin.module_name) else {
            return Ok(Outcome::NotInstalled { name: plugin.name });
        };
        if versions_equal(current, &plugin.version) {
            return Ok(Outcome::AlreadyLatest { name: plugin.name });
        }

        info!(plugin = %plugin.name, from = %current, to = %plugin.version, "Updating plugin");
        self.install(&plugin).await?;
        Ok(Outcome::Updated { name: plugin.name })
    }

    /// Update every installed plugin whose catalog version differs.
    ///
    /// Failures are recorded per plugin and never stop the batch.
    pub async fn update_all(&self) -> Result<UpdateReport, StoreError> {
        let plugins = self.catalog.plugins().await?;
        let installed = self.installed.get().await?;
        let mut report = UpdateReport::default();

        for plugin in plugins.iter() {
            let Some(current) = installed.get(&plugin.module_name) else {
                continue;
            };
            if versions_equal(current, &plugin.version) {
                report.skipped.push(plugin.name.clone());
                continue;
            }
            match self.install(plugin).await {
                Ok(()) => {
                    info!(plugin = %plugin.name, version = %plugin.version, "Plugin updated");
                    report.succeeded.push(plugin.name.clone());
                }
                Err(e) => {
                    error!(plugin = %plugin.name, error = %e, "Plugin update failed");
                    report.failed.push(plugin.name.clone());
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Bulk update finished"
        );
        Ok(report)
    }

    // -- install pipeline ---------------------------------------------------

    /// Locate, download, stage, install dependencies, then commit into place.
    ///
    /// Any previous directory for the module is only replaced at commit, so a
    /// failure at an earlier step leaves it untouched.
    async fn install(&self, plugin: &PluginDescriptor) -> Result<(), StoreError> {
        let url = self
            .locator
            .download_url(&plugin.project_link)
            .await?
            .ok_or_else(|| StoreError::DownloadUnavailable(plugin.name.clone()))?;

        info!(plugin = %plugin.name, url = %url, "Downloading plugin wheel");
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec();

        let root = self.plugins_root().to_path_buf();
        let module = plugin.module_name.clone();
        let verify = self.config.plugins.verify_hashes;
        let staged = tokio::task::spawn_blocking(move || {
            StagedPlugin::prepare(bytes, &root, &module, verify)
        })
        .await??;
        debug!(
            plugin = %plugin.name,
            files = ?staged.files(),
            dependencies = ?staged.dependencies(),
            "Wheel extracted"
        );

        if staged.dependencies().is_empty() {
            debug!(plugin = %plugin.name, "No dependencies to install");
        } else {
            self.installer
                .install(&staged.path().join(REQUIREMENTS_FILE))
                .await?;
        }

        let target = self.plugin_dir(&plugin.module_name);
        tokio::task::spawn_blocking(move || staged.commit(&target)).await??;

        self.installed
            .registry()
            .record_install(&plugin.module_name, &plugin.version)
            .await?;
        self.installed.invalidate().await;
        Ok(())
    }
}
