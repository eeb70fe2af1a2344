//! Installed-plugin registry.
//!
//! The registry answers which modules are loaded and at what version. The store
//! reads it through [`InstalledCache`], which holds the mapping until it is
//! explicitly refreshed or invalidated.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Version recorded when the registry does not know it
pub const UNKNOWN_VERSION: &str = "unknown";

/// Module name to installed version
pub type InstalledMap = HashMap<String, String>;

/// Source of truth for loaded plugins
#[async_trait]
pub trait InstalledRegistry: Send + Sync {
    /// `(module_name, version)` for every loaded plugin
    async fn loaded_plugins(&self) -> Result<Vec<(String, Option<String>)>, StoreError>;

    /// Called after a plugin directory was committed
    async fn record_install(&self, _module: &str, _version: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// Called after a plugin directory was deleted
    async fn record_removal(&self, _module: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file registry
// ---------------------------------------------------------------------------

/// Registry kept in a JSON object of `module -> version | null`
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; a missing file is an empty registry
    async fn load(&self) -> Result<BTreeMap<String, Option<String>>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No installed registry file yet");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            warn!(path = ?self.path, error = %e, "Failed to parse installed registry");
            StoreError::Registry(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, entries: &BTreeMap<String, Option<String>>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, json).await?;
        debug!(path = ?self.path, count = entries.len(), "Saved installed registry");
        Ok(())
    }
}

#[async_trait]
impl InstalledRegistry for JsonFileRegistry {
    async fn loaded_plugins(&self) -> Result<Vec<(String, Option<String>)>, StoreError> {
        Ok(self.load().await?.into_iter().collect())
    }

    async fn record_install(&self, module: &str, version: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let version = (!version.is_empty()).then(|| version.to_string());
        entries.insert(module.to_string(), version);
        self.save(&entries).await
    }

    async fn record_removal(&self, module: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(module).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory registry
// ---------------------------------------------------------------------------

/// Registry held in memory; installs and removals update it
#[derive(Debug, Default)]
pub struct StaticRegistry {
    entries: RwLock<BTreeMap<String, Option<String>>>,
}

impl StaticRegistry {
    pub fn new<I, M>(entries: I) -> Self
    where
        I: IntoIterator<Item = (M, Option<String>)>,
        M: Into<String>,
    {
        Self {
            entries: RwLock::new(entries.into_iter().map(|(m, v)| (m.into(), v)).collect()),
        }
    }
}

#[async_trait]
impl InstalledRegistry for StaticRegistry {
    async fn loaded_plugins(&self) -> Result<Vec<(String, Option<String>)>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(m, v)| (m.clone(), v.clone()))
            .collect())
    }

    async fn record_install(&self, module: &str, version: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(module.to_string(), Some(version.to_string()));
        Ok(())
    }

    async fn record_removal(&self, module: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(module);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Installed map read lazily from a registry and kept until invalidated
pub struct InstalledCache {
    registry: Arc<dyn InstalledRegistry>,
    cached: Mutex<Option<Arc<InstalledMap>>>,
}

impl InstalledCache {
    pub fn new(registry: Arc<dyn InstalledRegistry>) -> Self {
        Self {
            registry,
            cached: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<dyn InstalledRegistry> {
        &self.registry
    }

    /// Cached map, loading it on first use
    pub async fn get(&self) -> Result<Arc<InstalledMap>, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(map) = cached.as_ref() {
            return Ok(Arc::clone(map));
        }
        let map = Arc::new(self.load().await?);
        *cached = Some(Arc::clone(&map));
        Ok(map)
    }

    /// Reload from the registry now
    pub async fn refresh(&self) -> Result<Arc<InstalledMap>, StoreError> {
        self.invalidate().await;
        self.get().await
    }

    /// Forget the cached map; the next read reloads it
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn load(&self) -> Result<InstalledMap, StoreError> {
        let loaded = self.registry.loaded_plugins().await?;
        debug!(count = loaded.len(), "Loaded installed plugins");
        Ok(loaded
            .into_iter()
            .map(|(module, version)| {
                let version = version
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
                (module, version)
            })
            .collect())
    }
}
