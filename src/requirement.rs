//! `Requires-Dist` parsing.
//!
//! Each requirement line from a wheel's METADATA is normalized into the form pip
//! accepts on a requirements file line: `name[extras]specifier; marker`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const REQUIRES_DIST: &str = "Requires-Dist:";

const OPERATORS: [&str; 8] = ["===", "~=", "==", "!=", "<=", ">=", "<", ">"];

/// Errors from parsing a single requirement string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequirementError {
    #[error("missing distribution name")]
    MissingName,

    #[error("unterminated {0}")]
    Unterminated(&'static str),

    #[error("invalid version specifier: {0}")]
    InvalidSpecifier(String),

    #[error("unexpected input: {0}")]
    Unexpected(String),
}

/// A parsed dependency declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: BTreeSet<String>,
    pub specifier: Option<String>,
    pub marker: Option<String>,
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (body, marker) = match s.split_once(';') {
            Some((body, marker)) => (body, Some(marker.trim())),
            None => (s, None),
        };
        let marker = match marker {
            Some("") => return Err(RequirementError::Unexpected(";".to_string())),
            Some(m) => Some(m.replace('\'', "\"")),
            None => None,
        };

        let body = body.trim();
        let name_end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
            .unwrap_or(body.len());
        let name = &body[..name_end];
        if name.is_empty()
            || !name.starts_with(|c: char| c.is_ascii_alphanumeric())
            || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
        {
            return Err(RequirementError::MissingName);
        }

        let mut rest = body[name_end..].trim_start();
        let mut extras = BTreeSet::new();
        if let Some(after) = rest.strip_prefix('[') {
            let (inner, tail) = after
                .split_once(']')
                .ok_or(RequirementError::Unterminated("extras"))?;
            for extra in inner.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                if !extra
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
                {
                    return Err(RequirementError::Unexpected(extra.to_string()));
                }
                extras.insert(extra.to_string());
            }
            rest = tail.trim_start();
        }

        if let Some(after) = rest.strip_prefix('(') {
            let inner = after
                .strip_suffix(')')
                .ok_or(RequirementError::Unterminated("parenthesized specifier"))?;
            rest = inner;
        }

        let specifier = parse_specifier(rest)?;

        Ok(Self {
            name: name.to_string(),
            extras,
            specifier,
            marker,
        })
    }
}

/// Normalize a comma-separated specifier set: whitespace removed, clauses sorted
fn parse_specifier(raw: &str) -> Result<Option<String>, RequirementError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let mut clauses = Vec::new();
    for clause in raw.split(',') {
        let clause: String = clause.split_whitespace().collect();
        let op = OPERATORS
            .iter()
            .find(|op| clause.starts_with(**op))
            .ok_or_else(|| RequirementError::InvalidSpecifier(clause.clone()))?;
        let version = &clause[op.len()..];
        if version.is_empty()
            || !version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '*' | '+' | '!' | '-' | '_'))
        {
            return Err(RequirementError::InvalidSpecifier(clause.clone()));
        }
        clauses.push(clause);
    }
    clauses.sort();
    Ok(Some(clauses.join(",")))
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            let extras: Vec<&str> = self.extras.iter().map(String::as_str).collect();
            write!(f, "[{}]", extras.join(","))?;
        }
        if let Some(spec) = &self.specifier {
            write!(f, "{}", spec)?;
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {}", marker)?;
        }
        Ok(())
    }
}

/// Render one `Requires-Dist` value for an installer.
///
/// Unparseable values (URL requirements, exotic syntax) are passed through verbatim
/// so the installer still sees them.
pub fn render_for_installer(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<Requirement>() {
        Ok(req) => req.to_string(),
        Err(e) => {
            tracing::debug!(requirement = %raw, error = %e, "Keeping requirement verbatim");
            raw.to_string()
        }
    }
}

/// Collect installer arguments from the text of a METADATA file
pub fn dependencies_from_metadata(metadata: &str) -> Vec<String> {
    metadata
        .lines()
        .filter_map(|line| line.strip_prefix(REQUIRES_DIST))
        .map(render_for_installer)
        .filter(|dep| !dep.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extras_and_marker_quotes() {
        assert_eq!(
            render_for_installer("foo[bar]>=1.0; python_version>='3.8'"),
            "foo[bar]>=1.0; python_version>=\"3.8\""
        );
    }

    #[test]
    fn test_extras_sorted() {
        let req: Requirement = "httpx[socks, http2, brotli]>=0.24".parse().unwrap();
        assert_eq!(req.to_string(), "httpx[brotli,http2,socks]>=0.24");
    }

    #[test]
    fn test_parenthesized_specifier_normalized() {
        assert_eq!(
            render_for_installer("nonebot2 (>= 2.0.0, <3.0.0)"),
            "nonebot2<3.0.0,>=2.0.0"
        );
    }

    #[test]
    fn test_bare_name() {
        let req: Requirement = "psutil".parse().unwrap();
        assert_eq!(req.name, "psutil");
        assert!(req.extras.is_empty());
        assert!(req.specifier.is_none());
        assert!(req.marker.is_none());
        assert_eq!(req.to_string(), "psutil");
    }

    #[test]
    fn test_marker_without_specifier() {
        assert_eq!(
            render_for_installer("tomli ; python_version < '3.11'"),
            "tomli; python_version < \"3.11\""
        );
    }

    #[test]
    fn test_unparseable_kept_verbatim() {
        assert_eq!(
            render_for_installer("pkg @ https://example.com/pkg.zip"),
            "pkg @ https://example.com/pkg.zip"
        );
        assert_eq!(render_for_installer("foo[bar"), "foo[bar");
        assert_eq!(render_for_installer("foo ~~ 1"), "foo ~~ 1");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "[x]>=1".parse::<Requirement>(),
            Err(RequirementError::MissingName)
        );
        assert_eq!(
            "foo[bar".parse::<Requirement>(),
            Err(RequirementError::Unterminated("extras"))
        );
        assert!(matches!(
            "foo >=".parse::<Requirement>(),
            Err(RequirementError::InvalidSpecifier(_))
        ));
    }

    #[test]
    fn test_dependencies_from_metadata() {
        let metadata = "Metadata-Version: 2.1\n\
Name: nonebot-plugin-status\n\
Version: 0.9.0\n\
Requires-Dist: nonebot2 (>=2.2.0,<3.0.0)\n\
Requires-Dist: psutil>=5.7.2\n\
Requires-Dist: nonebot-adapter-onebot[v11] ; extra == 'onebot'\n\
\n\
Description body mentioning Requires-Dist: nothing\n";
        let deps = dependencies_from_metadata(metadata);
        assert_eq!(
            deps,
            vec![
                "nonebot2<3.0.0,>=2.2.0".to_string(),
                "psutil>=5.7.2".to_string(),
                "nonebot-adapter-onebot[v11]; extra == \"onebot\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_no_requirements() {
        assert!(dependencies_from_metadata("Name: x\nVersion: 1\n").is_empty());
    }
}
