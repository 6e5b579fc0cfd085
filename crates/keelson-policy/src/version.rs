//! Lenient semantic versions and range constraints
//!
//! Registry tags rarely follow semver to the letter. A leading `v` is
//! accepted and one- or two-component cores are padded (`v1.2` reads as
//! `1.2.0`). Ranges accept space- or comma-separated comparators, `||`
//! alternatives and hyphen ranges (`1.2.3 - 2.0.0`).

use crate::error::{PolicyError, Result};
use semver::{Version, VersionReq};

/// Parse a tag as a semantic version, tolerating a `v` prefix and short cores
pub fn parse_lenient(tag: &str) -> Option<Version> {
    let s = tag
        .strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag);
    if s.is_empty() {
        return None;
    }

    let core_end = s.find(['-', '+']).unwrap_or(s.len());
    let (core, suffix) = s.split_at(core_end);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let padded = match parts.len() {
        1 => format!("{}.0.0{}", core, suffix),
        2 => format!("{}.0{}", core, suffix),
        _ => s.to_string(),
    };
    Version::parse(&padded).ok()
}

/// Whether a value is made of ASCII digits only
pub fn is_all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// A compiled range: satisfied when any alternative is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(range: &str) -> Result<Self> {
        let invalid = |reason: String| PolicyError::InvalidRange {
            range: range.to_string(),
            reason,
        };

        let mut alternatives = Vec::new();
        for alternative in range.split("||") {
            let comparators = normalize_comparators(alternative).map_err(&invalid)?;
            let req = if comparators.is_empty() {
                VersionReq::STAR
            } else {
                VersionReq::parse(&comparators.join(", ")).map_err(|e| invalid(e.to_string()))?
            };
            alternatives.push(req);
        }

        Ok(Self {
            source: range.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Turn one alternative into comparator strings the `semver` crate accepts
fn normalize_comparators(alternative: &str) -> std::result::Result<Vec<String>, String> {
    let tokens: Vec<&str> = alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];

        // Hyphen range: `a - b` means `>=a, <=b`
        if tokens.get(i + 1) == Some(&"-") {
            let upper = tokens
                .get(i + 2)
                .ok_or_else(|| format!("hyphen range '{} -' has no upper bound", token))?;
            out.push(format!(">={}", strip_v(token)));
            out.push(format!("<={}", strip_v(upper)));
            i += 3;
            continue;
        }

        // A bare operator binds to the following version: `>= 1.2`
        if token.bytes().all(|b| matches!(b, b'<' | b'>' | b'=' | b'~' | b'^')) {
            let version = tokens
                .get(i + 1)
                .ok_or_else(|| format!("operator '{}' has no version", token))?;
            out.push(format!("{}{}", token, strip_v(version)));
            i += 2;
            continue;
        }

        out.push(comparator(token));
        i += 1;
    }
    Ok(out)
}

fn comparator(token: &str) -> String {
    let op_len = token
        .bytes()
        .take_while(|b| matches!(b, b'<' | b'>' | b'=' | b'~' | b'^'))
        .count();
    let (op, version) = token.split_at(op_len);
    let version = strip_v(version);
    let wildcard = version.contains(['x', 'X', '*']);

    // A bare version means exactly that version
    if op.is_empty() && !wildcard && version.starts_with(|c: char| c.is_ascii_digit()) {
        format!("={}", version)
    } else {
        format!("{}{}", op, version)
    }
}

fn strip_v(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(parse_lenient("v1.2.3"), Some(v("1.2.3")));
        assert_eq!(parse_lenient("1.2"), Some(v("1.2.0")));
        assert_eq!(parse_lenient("V7"), Some(v("7.0.0")));
        assert_eq!(parse_lenient("v2.0.0-rc1"), Some(v("2.0.0-rc1")));
        assert_eq!(parse_lenient("1.2-alpha"), Some(v("1.2.0-alpha")));
        assert_eq!(parse_lenient("1.2.3+build.5"), Some(v("1.2.3+build.5")));

        assert_eq!(parse_lenient("latest"), None);
        assert_eq!(parse_lenient("main-abc123-100"), None);
        assert_eq!(parse_lenient("1.2.3.4"), None);
        assert_eq!(parse_lenient("v"), None);
        assert_eq!(parse_lenient("1..2"), None);
    }

    #[test]
    fn test_space_separated_range() {
        let range = VersionRange::parse(">=1.2.0 <2.0.0").unwrap();
        assert!(range.matches(&v("1.2.4")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("1.1.9")));
        // Pre-releases only match comparators on the same core
        assert!(!range.matches(&v("2.0.0-rc1")));
    }

    #[test]
    fn test_operator_with_space() {
        let range = VersionRange::parse(">= 1.2, < 2").unwrap();
        assert!(range.matches(&v("1.5.0")));
        assert!(!range.matches(&v("2.0.0")));
    }

    #[test]
    fn test_alternatives() {
        let range = VersionRange::parse("~1.2 || >=3.0.0").unwrap();
        assert!(range.matches(&v("1.2.9")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(range.matches(&v("3.1.0")));
    }

    #[test]
    fn test_hyphen_range() {
        let range = VersionRange::parse("1.2.3 - 2.0.0").unwrap();
        assert!(range.matches(&v("1.2.3")));
        assert!(range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("2.0.1")));
    }

    #[test]
    fn test_bare_version_is_exact() {
        let range = VersionRange::parse("v1.4.0").unwrap();
        assert!(range.matches(&v("1.4.0")));
        assert!(!range.matches(&v("1.4.1")));
    }

    #[test]
    fn test_wildcards() {
        let range = VersionRange::parse("1.x").unwrap();
        assert!(range.matches(&v("1.9.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(VersionRange::parse("*").unwrap().matches(&v("9.9.9")));
    }

    #[test]
    fn test_invalid_range() {
        for bad in [">=banana", ">=", "1.2.3 -", "<<1.0.0"] {
            assert!(
                matches!(VersionRange::parse(bad), Err(PolicyError::InvalidRange { .. })),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_all_digits() {
        assert!(is_all_digits("20240601"));
        assert!(!is_all_digits("1.2"));
        assert!(!is_all_digits(""));
    }
}
