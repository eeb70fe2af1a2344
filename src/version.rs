//! Version comparison.
//!
//! Installed-vs-catalog checks use plain string equality. Ordering of archive
//! candidates goes through [`VersionKey`], which coerces Python-style release strings
//! (`1.2`, `0.3.0rc1`, `2.0.post1`) into a semver value so they can be sorted.

use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};
use std::sync::LazyLock;

static SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(a|alpha|b|beta|c|rc|pre|preview)[._-]?(\d*))?(?:[._-]?(post|rev|r)[._-]?(\d*))?(?:[._-]?(dev)[._-]?(\d*))?$",
    )
    .expect("version suffix pattern is valid")
});

/// Exact string equality; `1.0` and `1.0.0` are different versions here
pub fn versions_equal(a: &str, b: &str) -> bool {
    a == b
}

/// Orderable version. Anything that fails to parse sorts below every valid version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionKey(Option<Version>);

impl VersionKey {
    /// Parse a release string such as `1.4.0`, `v2.0b3` or `0.9.post2`
    pub fn parse(raw: &str) -> Self {
        Self(coerce(raw))
    }

    /// Key for a wheel filename: the version is the second `-`-separated field,
    /// e.g. `nonebot_plugin_status-0.9.0-py3-none-any.whl`
    pub fn from_wheel_filename(filename: &str) -> Self {
        match filename.split('-').nth(1) {
            Some(version) => Self::parse(version),
            None => Self(None),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn as_semver(&self) -> Option<&Version> {
        self.0.as_ref()
    }
}

fn coerce(raw: &str) -> Option<Version> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix('v')
        .or_else(|| raw.strip_prefix('V'))
        .unwrap_or(raw);
    let (public, local) = match raw.split_once('+') {
        Some((public, local)) => (public, Some(local)),
        None => (raw, None),
    };

    let release_end = public
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(public.len());
    let release = public[..release_end].trim_end_matches('.');
    if release.is_empty() {
        return None;
    }
    let mut numbers = Vec::new();
    for part in release.split('.') {
        numbers.push(part.parse::<u64>().ok()?);
    }

    let suffix = public[release_end..].to_ascii_lowercase();
    let caps = SUFFIX.captures(suffix.trim_start_matches(['.', '-', '_']))?;
    let number = |idx: usize| {
        caps.get(idx)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
            .to_string()
    };

    let mut pre = Vec::new();
    if let Some(tag) = caps.get(1) {
        let tag = match tag.as_str() {
            "alpha" | "a" => "a",
            "beta" | "b" => "b",
            _ => "rc",
        };
        pre.push(tag.to_string());
        pre.push(number(2));
    }
    match (pre.is_empty(), caps.get(5).is_some()) {
        // dev releases precede alphas
        (true, true) => {
            pre.push("0dev".to_string());
            pre.push(number(6));
        }
        // `rc1.dev2` precedes `rc1`; "dev" sorts below "final"
        (false, true) => {
            pre.push("dev".to_string());
            pre.push(number(6));
        }
        (false, false) => pre.push("final".to_string()),
        (true, false) => {}
    }

    let mut build: Vec<String> = numbers.iter().skip(3).map(u64::to_string).collect();
    if caps.get(3).is_some() {
        build.push("post".to_string());
        build.push(number(4));
    }
    if let Some(local) = local {
        build.extend(
            local
                .split(['.', '-', '_'])
                .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
                .map(str::to_string),
        );
    }

    let mut version = Version::new(
        numbers.first().copied().unwrap_or(0),
        numbers.get(1).copied().unwrap_or(0),
        numbers.get(2).copied().unwrap_or(0),
    );
    if !pre.is_empty() {
        version.pre = Prerelease::new(&pre.join(".")).ok()?;
    }
    if !build.is_empty() {
        version.build = BuildMetadata::new(&build.join(".")).ok()?;
    }
    Some(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_equal_is_string_equality() {
        assert!(versions_equal("1.0.0", "1.0.0"));
        assert!(versions_equal("", ""));
        assert!(!versions_equal("1.0", "1.0.0"));
        assert!(!versions_equal("v1.0.0", "1.0.0"));
        assert!(!versions_equal("unknown", "0.1.0"));
    }

    #[test]
    fn test_parse_plain_release() {
        let key = VersionKey::parse("1.2");
        assert_eq!(key.as_semver(), Some(&Version::new(1, 2, 0)));
        assert!(VersionKey::parse("v0.3.1").is_valid());
    }

    #[test]
    fn test_release_ordering() {
        assert!(VersionKey::parse("0.10.0") > VersionKey::parse("0.9.9"));
        assert!(VersionKey::parse("1.0.0") > VersionKey::parse("1.0.0rc1"));
        assert!(VersionKey::parse("1.0.0rc1") > VersionKey::parse("1.0.0b2"));
        assert!(VersionKey::parse("1.0.0b2") > VersionKey::parse("1.0.0a5"));
        assert!(VersionKey::parse("1.0.0a1") > VersionKey::parse("1.0.0.dev3"));
        assert!(VersionKey::parse("1.0.0.post1") > VersionKey::parse("1.0.0"));
        assert!(VersionKey::parse("1.0.1") > VersionKey::parse("1.0.0.post1"));
    }

    #[test]
    fn test_dev_of_prerelease_sorts_before_it() {
        assert!(VersionKey::parse("1.0rc1.dev2") < VersionKey::parse("1.0rc1"));
        assert!(VersionKey::parse("1.0rc1.dev2") > VersionKey::parse("1.0rc0"));
        assert!(VersionKey::parse("1.0rc1.dev2") > VersionKey::parse("1.0b9"));
        assert!(VersionKey::parse("1.0rc1.dev3") > VersionKey::parse("1.0rc1.dev2"));
        assert!(VersionKey::parse("1.0a1.dev1") > VersionKey::parse("1.0.dev9"));
    }

    #[test]
    fn test_malformed_sorts_lowest() {
        let bad = VersionKey::parse("latest");
        assert!(!bad.is_valid());
        assert!(bad < VersionKey::parse("0.0.1"));
        assert!(!VersionKey::parse("1..2").is_valid());
        assert!(!VersionKey::parse("1.0garbage").is_valid());
    }

    #[test]
    fn test_from_wheel_filename() {
        let key = VersionKey::from_wheel_filename("nonebot_plugin_status-0.9.0-py3-none-any.whl");
        assert_eq!(key.as_semver(), Some(&Version::new(0, 9, 0)));
        assert!(!VersionKey::from_wheel_filename("no_version.whl").is_valid());
    }

    #[test]
    fn test_sort_wheel_filenames() {
        let mut files = vec![
            "pkg-0.2.0-py3-none-any.whl",
            "pkg-broken-py3-none-any.whl",
            "pkg-0.10.0-py3-none-any.whl",
            "pkg-0.9.1-py3-none-any.whl",
        ];
        files.sort_by_key(|f| std::cmp::Reverse(VersionKey::from_wheel_filename(f)));
        assert_eq!(files[0], "pkg-0.10.0-py3-none-any.whl");
        assert_eq!(files[3], "pkg-broken-py3-none-any.whl");
    }
}
