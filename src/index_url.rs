//! Package index discovery.
//!
//! The index base URL comes from an ordered list of sources. Each source may yield
//! nothing; the first one that answers wins and the public index is the final
//! fallback, so resolution never fails.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::StoreConfig;

/// Public PyPI simple index
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple/";

/// Mirror known to answer archive downloads with 403
const TSINGHUA_MIRROR: &str = "pypi.tuna.tsinghua.edu.cn";

static INDEX_URL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:[\w-]+\.)?index-url\s*=\s*['"]?([^'"\s]+)['"]?\s*$"#)
        .expect("index-url pattern is valid")
});

/// One place the index URL may be configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    /// Explicit URL from the store configuration
    Fixed(String),
    /// `python -m pip config get global.index-url`
    PipConfigGet,
    /// `python -m pip config list`, scanned for an `index-url` key
    PipConfigList,
}

impl IndexSource {
    async fn probe(&self, python: &str, query_timeout: Duration) -> Option<String> {
        match self {
            Self::Fixed(url) => non_empty(url),
            Self::PipConfigGet => {
                let stdout =
                    run_pip_config(python, &["config", "get", "global.index-url"], query_timeout)
                        .await?;
                non_empty(stdout.trim())
            }
            Self::PipConfigList => {
                let stdout = run_pip_config(python, &["config", "list"], query_timeout).await?;
                index_url_from_config_list(&stdout)
            }
        }
    }
}

fn non_empty(url: &str) -> Option<String> {
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

async fn run_pip_config(python: &str, args: &[&str], query_timeout: Duration) -> Option<String> {
    let mut cmd = Command::new(python);
    cmd.arg("-m").arg("pip").args(args).kill_on_drop(true);

    match timeout(query_timeout, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            debug!(args = ?args, status = %output.status, "pip config query returned failure");
            None
        }
        Ok(Err(e)) => {
            debug!(args = ?args, error = %e, "Failed to run pip config query");
            None
        }
        Err(_) => {
            warn!(args = ?args, timeout_secs = query_timeout.as_secs(), "pip config query timed out");
            None
        }
    }
}

/// Pick the `index-url` value out of `pip config list` output
pub fn index_url_from_config_list(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| INDEX_URL_LINE.captures(line))
        .map(|caps| caps[1].to_string())
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

/// Resolves the active package index base URL
#[derive(Debug, Clone)]
pub struct IndexResolver {
    sources: Vec<IndexSource>,
    default_url: String,
    python: String,
    query_timeout: Duration,
}

impl IndexResolver {
    pub fn new(sources: Vec<IndexSource>, default_url: impl Into<String>) -> Self {
        Self {
            sources,
            default_url: default_url.into(),
            python: "python3".to_string(),
            query_timeout: Duration::from_secs(5),
        }
    }

    /// Sources from the store configuration: fixed override first, then pip
    pub fn from_config(config: &StoreConfig) -> Self {
        let mut sources = Vec::new();
        if let Some(url) = &config.index.url {
            sources.push(IndexSource::Fixed(url.clone()));
        }
        sources.push(IndexSource::PipConfigGet);
        sources.push(IndexSource::PipConfigList);

        Self::new(sources, config.index.default_url.clone())
            .with_python(config.installer.python.clone())
            .with_query_timeout(Duration::from_secs(config.index.query_timeout_secs))
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn sources(&self) -> &[IndexSource] {
        &self.sources
    }

    /// First source that yields a URL, else the default. Always ends with `/`.
    pub async fn resolve(&self) -> String {
        for source in &self.sources {
            if let Some(url) = source.probe(&self.python, self.query_timeout).await {
                debug!(source = ?source, url = %url, "Resolved package index");
                let url = with_trailing_slash(url);
                if url.contains(TSINGHUA_MIRROR) {
                    warn!(url = %url, "Tsinghua mirror in use, wheel downloads may fail with 403");
                }
                return url;
            }
        }
        debug!(url = %self.default_url, "Falling back to default package index");
        with_trailing_slash(self.default_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_list_parsing() {
        let output = "global.extra-index-url='https://extra.example/simple'\n\
global.index-url='https://mirrors.example.com/pypi/simple'\n\
global.timeout='60'\n";
        assert_eq!(
            index_url_from_config_list(output).as_deref(),
            Some("https://mirrors.example.com/pypi/simple")
        );
    }

    #[test]
    fn test_config_list_unquoted_and_missing() {
        assert_eq!(
            index_url_from_config_list("user.index-url = https://idx.example/simple/").as_deref(),
            Some("https://idx.example/simple/")
        );
        assert!(index_url_from_config_list("global.timeout='60'\n").is_none());
        assert!(index_url_from_config_list("").is_none());
    }

    #[tokio::test]
    async fn test_fixed_source_wins() {
        let resolver = IndexResolver::new(
            vec![IndexSource::Fixed("https://idx.example/simple".to_string())],
            DEFAULT_INDEX_URL,
        );
        assert_eq!(resolver.resolve().await, "https://idx.example/simple/");
    }

    #[tokio::test]
    async fn test_failing_sources_fall_back_to_default() {
        let resolver = IndexResolver::new(
            vec![
                IndexSource::Fixed("   ".to_string()),
                IndexSource::PipConfigGet,
                IndexSource::PipConfigList,
            ],
            "https://fallback.example/simple",
        )
        .with_python("definitely-not-a-python-binary")
        .with_query_timeout(Duration::from_secs(1));
        assert_eq!(resolver.resolve().await, "https://fallback.example/simple/");
    }

    #[tokio::test]
    async fn test_no_sources_uses_default() {
        let resolver = IndexResolver::new(Vec::new(), DEFAULT_INDEX_URL);
        assert_eq!(resolver.resolve().await, DEFAULT_INDEX_URL);
    }
}
