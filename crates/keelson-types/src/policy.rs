//! Image policy declarations
//!
//! A policy is an optional regex filter (with optional named-capture
//! extraction) plus at most one ordering clause. Compilation and evaluation
//! live in `keelson-policy`; these are the declarative, serde-facing shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort direction for numerical and alphabetical ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

/// Tag filter: keep tags matching `pattern`, optionally comparing on a capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    /// Regular expression; tags matching anywhere survive
    pub pattern: String,

    /// Named capture group to compare on, optionally written as `$name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<String>,
}

impl TagFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            extract: None,
        }
    }

    pub fn with_extract(mut self, extract: impl Into<String>) -> Self {
        self.extract = Some(extract.into());
        self
    }

    /// Capture group name with any leading `$` removed
    pub fn capture_name(&self) -> Option<&str> {
        self.extract
            .as_deref()
            .map(|e| e.strip_prefix('$').unwrap_or(e))
            .filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NumericalPolicy {
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SemverPolicy {
    /// Constraint such as `">=1.2.0 <2.0.0"`; absent means any version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlphabeticalPolicy {
    #[serde(default)]
    pub order: SortOrder,
}

/// The single ordering clause of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingClause<'a> {
    Numerical(&'a NumericalPolicy),
    Semver(&'a SemverPolicy),
    Alphabetical(&'a AlphabeticalPolicy),
}

/// Declarative tag selector
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImagePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<TagFilter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numerical: Option<NumericalPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver: Option<SemverPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alphabetical: Option<AlphabeticalPolicy>,
}

impl ImagePolicy {
    pub fn semver(range: Option<&str>) -> Self {
        Self {
            semver: Some(SemverPolicy {
                range: range.map(str::to_string),
            }),
            ..Default::default()
        }
    }

    pub fn numerical(order: SortOrder) -> Self {
        Self {
            numerical: Some(NumericalPolicy { order }),
            ..Default::default()
        }
    }

    pub fn alphabetical(order: SortOrder) -> Self {
        Self {
            alphabetical: Some(AlphabeticalPolicy { order }),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Number of ordering clauses declared (valid policies have 0 or 1)
    pub fn clause_count(&self) -> usize {
        usize::from(self.numerical.is_some())
            + usize::from(self.semver.is_some())
            + usize::from(self.alphabetical.is_some())
    }

    /// The ordering clause, if exactly one is declared
    pub fn ordering(&self) -> Option<OrderingClause<'_>> {
        if self.clause_count() != 1 {
            return None;
        }
        self.numerical
            .as_ref()
            .map(OrderingClause::Numerical)
            .or_else(|| self.semver.as_ref().map(OrderingClause::Semver))
            .or_else(|| self.alphabetical.as_ref().map(OrderingClause::Alphabetical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_shape() {
        let yaml = r#"
filter:
  pattern: '^main-[a-z0-9]+-(?P<ts>\d+)$'
  extract: '$ts'
numerical:
  order: desc
"#;
        let policy: ImagePolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.filter.as_ref().unwrap().capture_name(), Some("ts"));
        assert!(matches!(
            policy.ordering(),
            Some(OrderingClause::Numerical(NumericalPolicy {
                order: SortOrder::Desc
            }))
        ));
    }

    #[test]
    fn test_two_clauses_have_no_ordering() {
        let mut policy = ImagePolicy::semver(None);
        policy.alphabetical = Some(AlphabeticalPolicy::default());
        assert_eq!(policy.clause_count(), 2);
        assert!(policy.ordering().is_none());
    }

    #[test]
    fn test_order_defaults_to_asc() {
        let policy: ImagePolicy = serde_yaml::from_str("alphabetical: {}").unwrap();
        assert!(matches!(
            policy.ordering(),
            Some(OrderingClause::Alphabetical(AlphabeticalPolicy {
                order: SortOrder::Asc
            }))
        ));
    }
}
