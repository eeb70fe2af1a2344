//! Remote plugin catalog.
//!
//! The catalog is a JSON array of plugin descriptors served over HTTP. Library
//! entries are dropped on fetch. A fetched snapshot is shared by all callers until
//! its time-to-live expires; [`Catalog::refresh`] and [`Catalog::invalidate`] bypass it.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;

const LIBRARY_KIND: &str = "library";

// ---------------------------------------------------------------------------
// Descriptor types
// ---------------------------------------------------------------------------

/// A catalog tag; the registry serves objects, older mirrors plain strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TagRepr")]
pub struct Tag {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagRepr {
    Label(String),
    Full {
        label: String,
        #[serde(default)]
        color: Option<String>,
    },
}

impl From<TagRepr> for Tag {
    fn from(repr: TagRepr) -> Self {
        match repr {
            TagRepr::Label(label) => Tag { label, color: None },
            TagRepr::Full { label, color } => Tag { label, color },
        }
    }
}

/// One installable plugin as listed in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Import and directory name; identity key
    pub module_name: String,
    /// Distribution name on the package index
    pub project_link: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Last update, as served
    #[serde(default)]
    pub time: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Whether the plugin passed the registry's load test
    #[serde(default)]
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub is_official: bool,
}

impl PluginDescriptor {
    /// Parsed update time; `None` when absent or in an unknown format
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.time.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn is_library(&self) -> bool {
        self.kind.as_deref() == Some(LIBRARY_KIND)
    }

    /// Case-insensitive substring match over name, author and description
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.author.to_lowercase().contains(&query)
            || self.desc.to_lowercase().contains(&query)
    }
}

// ---------------------------------------------------------------------------
// Fetching and caching
// ---------------------------------------------------------------------------

struct Snapshot {
    fetched_at: Instant,
    plugins: Arc<Vec<PluginDescriptor>>,
}

/// Catalog client with a time-to-live snapshot cache
pub struct Catalog {
    http: Client,
    url: String,
    ttl: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl Catalog {
    pub fn new(http: Client, url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            ttl,
            snapshot: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current snapshot, fetched when missing or older than the TTL
    pub async fn plugins(&self) -> Result<Arc<Vec<PluginDescriptor>>, StoreError> {
        let mut snapshot = self.snapshot.lock().await;
        if let Some(current) = snapshot.as_ref() {
            if current.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&current.plugins));
            }
        }
        let plugins = Arc::new(self.fetch().await?);
        *snapshot = Some(Snapshot {
            fetched_at: Instant::now(),
            plugins: Arc::clone(&plugins),
        });
        Ok(plugins)
    }

    /// Drop the snapshot and fetch a new one
    pub async fn refresh(&self) -> Result<Arc<Vec<PluginDescriptor>>, StoreError> {
        self.invalidate().await;
        self.plugins().await
    }

    /// Drop the snapshot; the next read fetches
    pub async fn invalidate(&self) {
        *self.snapshot.lock().await = None;
    }

    async fn fetch(&self) -> Result<Vec<PluginDescriptor>, StoreError> {
        debug!(url = %self.url, "Fetching plugin catalog");
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "Failed to fetch plugin catalog");
            return Ok(Vec::new());
        }
        let body = response.text().await?;
        let plugins = parse_catalog(&body)?;
        info!(count = plugins.len(), "Fetched plugin catalog");
        Ok(plugins)
    }
}

/// Parse a catalog document, dropping library entries
pub fn parse_catalog(body: &str) -> Result<Vec<PluginDescriptor>, StoreError> {
    let all: Vec<PluginDescriptor> = serde_json::from_str(body)?;
    Ok(all.into_iter().filter(|p| !p.is_library()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CATALOG: &str = r##"[
        {
            "module_name": "nonebot_plugin_status",
            "project_link": "nonebot-plugin-status",
            "name": "Status",
            "desc": "Server status",
            "author": "yanyongyu",
            "homepage": "https://github.com/nonebot/plugin-status",
            "tags": [{"label": "server", "color": "#aeeaa8"}],
            "is_official": true,
            "type": "application",
            "valid": true,
            "time": "2023-06-22T09:44:10.283745Z",
            "version": "0.9.0"
        },
        {
            "module_name": "nonebot_plugin_alconna",
            "project_link": "nonebot-plugin-alconna",
            "name": "Alconna",
            "desc": "Command parsing",
            "author": "RF-Tar-Railt",
            "tags": ["command"],
            "type": "library",
            "time": "2024-01-01 12:00:00",
            "version": "0.40.0"
        },
        {
            "module_name": "minimal",
            "project_link": "minimal",
            "name": "Minimal"
        }
    ]"##;

    #[test]
    fn test_parse_filters_libraries() {
        let plugins = parse_catalog(CATALOG).unwrap();
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0].module_name, "nonebot_plugin_status");
        assert_eq!(plugins[0].tags[0].label, "server");
        assert_eq!(plugins[0].tags[0].color.as_deref(), Some("#aeeaa8"));
        assert!(plugins[0].is_official);
        assert_eq!(plugins[1].version, "");
        assert!(plugins[1].kind.is_none());
    }

    #[test]
    fn test_string_tags_and_time_formats() {
        let all: Vec<PluginDescriptor> = serde_json::from_str(CATALOG).unwrap();
        assert_eq!(all[1].tags[0].label, "command");
        assert!(all[1].tags[0].color.is_none());
        assert!(all[0].updated_at().is_some());
        assert!(all[1].updated_at().is_some());
        assert!(all[2].updated_at().is_none());
        assert!(all[0].updated_at() < all[1].updated_at());
    }

    #[test]
    fn test_query_matching() {
        let plugins = parse_catalog(CATALOG).unwrap();
        assert!(plugins[0].matches_query("STATUS"));
        assert!(plugins[0].matches_query("yongyu"));
        assert!(plugins[0].matches_query("server stat"));
        assert!(!plugins[0].matches_query("alconna"));
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CATALOG))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = Catalog::new(
            Client::new(),
            format!("{}/plugins.json", server.uri()),
            Duration::from_secs(60),
        );
        let first = catalog.plugins().await.unwrap();
        let second = catalog.plugins().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_and_invalidate_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CATALOG))
            .expect(3)
            .mount(&server)
            .await;

        let catalog = Catalog::new(
            Client::new(),
            format!("{}/plugins.json", server.uri()),
            Duration::from_secs(60),
        );
        catalog.plugins().await.unwrap();
        catalog.refresh().await.unwrap();
        catalog.invalidate().await;
        catalog.plugins().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_snapshot_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CATALOG))
            .expect(2)
            .mount(&server)
            .await;

        let catalog = Catalog::new(Client::new(), server.uri(), Duration::ZERO);
        catalog.plugins().await.unwrap();
        catalog.plugins().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let catalog = Catalog::new(Client::new(), server.uri(), Duration::from_secs(60));
        assert!(catalog.plugins().await.unwrap().is_empty());
    }
}
