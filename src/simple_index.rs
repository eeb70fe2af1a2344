//! PyPI-style simple index scraping.
//!
//! The simple index is an HTML page of anchors, one per archive. Only a small
//! streaming scanner is needed: it emits start-tag, end-tag and text events and a
//! collector tracks the anchor currently open. Malformed markup never errors; the
//! scanner skips what it cannot read.

use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::index_url::IndexResolver;
use crate::version::VersionKey;

const WHEEL_SUFFIX: &str = ".whl";

/// One markup event from the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlEvent {
    StartTag {
        name: String,
        attrs: Vec<(String, String)>,
    },
    EndTag {
        name: String,
    },
    Text(String),
}

/// Streaming tag/attribute/text scanner over an HTML document
pub struct HtmlScanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> HtmlScanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Skip past `terminator`, or to the end of input when it never appears
    fn skip_past(&mut self, terminator: &str) {
        match self.rest().find(terminator) {
            Some(idx) => self.pos += idx + terminator.len(),
            None => self.pos = self.input.len(),
        }
    }

    fn scan_tag(&mut self) -> Option<HtmlEvent> {
        let rest = self.rest();
        let closing = rest[1..].starts_with('/');
        let name_start = if closing { 2 } else { 1 };
        let body = &rest[name_start..];
        let name_len = body
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(body.len());
        let name = body[..name_len].to_ascii_lowercase();

        let Some(tag_end) = find_tag_end(&body[name_len..]) else {
            // unterminated tag swallows the rest of the document
            self.pos = self.input.len();
            return None;
        };
        let attr_src = &body[name_len..name_len + tag_end];
        self.pos += name_start + name_len + tag_end + 1;

        if closing {
            Some(HtmlEvent::EndTag { name })
        } else {
            Some(HtmlEvent::StartTag {
                name,
                attrs: parse_attributes(attr_src),
            })
        }
    }
}

impl Iterator for HtmlScanner<'_> {
    type Item = HtmlEvent;

    fn next(&mut self) -> Option<HtmlEvent> {
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return None;
            }
            if rest.starts_with("<!--") {
                self.skip_past("-->");
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                self.skip_past(">");
                continue;
            }
            let is_tag = rest.starts_with('<')
                && rest[1..]
                    .trim_start_matches('/')
                    .starts_with(|c: char| c.is_ascii_alphabetic());
            if is_tag {
                match self.scan_tag() {
                    Some(event) => return Some(event),
                    None => continue,
                }
            }

            // text runs until the next '<' that is not the current one
            let first = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            let end = rest[first..]
                .find('<')
                .map(|i| i + first)
                .unwrap_or(rest.len());
            self.pos += end;
            let text = decode_entities(&rest[..end]);
            if !text.trim().is_empty() {
                return Some(HtmlEvent::Text(text));
            }
        }
    }
}

/// Index of the `>` closing a tag, ignoring any inside quoted attribute values
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_attributes(src: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = src.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
    while !rest.is_empty() {
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_len].to_ascii_lowercase();
        rest = rest[name_len..].trim_start();

        let mut value = String::new();
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let inner = &after_eq[1..];
                    let end = inner.find(q).unwrap_or(inner.len());
                    value = decode_entities(&inner[..end]);
                    rest = inner.get(end + 1..).unwrap_or("");
                }
                _ => {
                    let end = after_eq
                        .find(char::is_whitespace)
                        .unwrap_or(after_eq.len());
                    value = decode_entities(&after_eq[..end]);
                    rest = &after_eq[end..];
                }
            }
        }
        if !name.is_empty() {
            attrs.push((name, value));
        }
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if trimmed.len() == rest.len() && name_len == 0 {
            // stray character that cannot start an attribute
            rest = rest.get(1..).unwrap_or("");
        } else {
            rest = trimmed;
        }
    }
    attrs
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// A wheel anchor found on a simple index page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelLink {
    pub href: String,
    pub filename: String,
}

/// Collects anchors whose text names a wheel archive
#[derive(Debug, Default)]
pub struct WheelLinkCollector {
    current_tag: Option<String>,
    current_href: Option<String>,
    links: Vec<WheelLink>,
}

impl WheelLinkCollector {
    pub fn visit(&mut self, event: HtmlEvent) {
        match event {
            HtmlEvent::StartTag { name, attrs } => {
                if name == "a" {
                    self.current_href = attrs
                        .into_iter()
                        .find(|(key, _)| key == "href")
                        .map(|(_, value)| value)
                        .filter(|href| !href.is_empty());
                }
                self.current_tag = Some(name);
            }
            HtmlEvent::EndTag { name } => {
                if name == "a" {
                    self.current_href = None;
                    self.current_tag = None;
                }
            }
            HtmlEvent::Text(text) => {
                let filename = text.trim();
                if self.current_tag.as_deref() != Some("a")
                    || !filename.to_ascii_lowercase().ends_with(WHEEL_SUFFIX)
                {
                    return;
                }
                if let Some(href) = &self.current_href {
                    self.links.push(WheelLink {
                        href: href.clone(),
                        filename: filename.to_string(),
                    });
                }
            }
        }
    }

    pub fn into_links(self) -> Vec<WheelLink> {
        self.links
    }
}

/// All wheel links on a simple index page, in document order
pub fn wheel_links(html: &str) -> Vec<WheelLink> {
    let mut collector = WheelLinkCollector::default();
    for event in HtmlScanner::new(html) {
        collector.visit(event);
    }
    collector.into_links()
}

/// The link with the newest version; unparseable versions lose to any valid one
pub fn newest_wheel(links: &[WheelLink]) -> Option<&WheelLink> {
    links
        .iter()
        .max_by_key(|link| VersionKey::from_wheel_filename(&link.filename))
}

/// Project page URL: name lowercased with `_` turned into `-`, trailing slash kept
pub fn project_url(index_url: &str, package: &str) -> Result<Url, StoreError> {
    let normalized = package.replace('_', "-").to_lowercase();
    let base = Url::parse(index_url)?;
    let mut url = base.join(&normalized)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Finds the download URL of a distribution's newest wheel
#[derive(Debug, Clone)]
pub struct WheelLocator {
    http: Client,
    resolver: IndexResolver,
    scrape_timeout: Duration,
    user_agent: String,
}

impl WheelLocator {
    pub fn new(http: Client, resolver: IndexResolver) -> Self {
        Self {
            http,
            resolver,
            scrape_timeout: Duration::from_secs(10),
            user_agent: "pip".to_string(),
        }
    }

    pub fn from_config(http: Client, config: &StoreConfig) -> Self {
        Self {
            http,
            resolver: IndexResolver::from_config(config),
            scrape_timeout: Duration::from_secs(config.index.scrape_timeout_secs),
            user_agent: config.index.user_agent.clone(),
        }
    }

    /// Newest wheel for `package` on the given index, `None` when there is none
    pub async fn newest_wheel_url(
        &self,
        package: &str,
        index_url: &str,
    ) -> Result<Option<Url>, StoreError> {
        let page_url = project_url(index_url, package)?;
        debug!(url = %page_url, "Fetching simple index page");

        let response = self
            .http
            .get(page_url.clone())
            .header(USER_AGENT, &self.user_agent)
            .timeout(self.scrape_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(url = %page_url, status = %response.status(), "Simple index page unavailable");
            return Ok(None);
        }
        let html = response.text().await?;

        let links = wheel_links(&html);
        let Some(newest) = newest_wheel(&links) else {
            info!(package = %package, "No wheel archives listed on simple index");
            return Ok(None);
        };
        let url = page_url.join(&newest.href)?;
        debug!(package = %package, candidates = links.len(), url = %url, "Selected newest wheel");
        Ok(Some(url))
    }

    /// Resolve the index and locate the newest wheel for `package`
    pub async fn download_url(&self, package: &str) -> Result<Option<Url>, StoreError> {
        let index_url = self.resolver.resolve().await;
        self.newest_wheel_url(package, &index_url).await
    }
}
