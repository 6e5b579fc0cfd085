//! Tag selection
//!
//! [`CompiledPolicy::select`] is pure and deterministic: the same tags in any
//! order give the same answer. Ties between equal comparison values are
//! broken by tag text, so `asc` picks the lexicographically smallest tag and
//! `desc` (and semver, which always takes the maximum) the greatest.

use crate::error::{PolicyError, Result};
use crate::version::{is_all_digits, parse_lenient, VersionRange};
use keelson_types::image::is_digest_tag;
use keelson_types::{ImagePolicy, OrderingClause, PolicySource, SortOrder};
use regex::Regex;
use std::cmp::Ordering;

/// Tag chosen by a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub tag: String,
    pub source: PolicySource,
}

#[derive(Debug, Clone)]
enum Order {
    Semver(Option<VersionRange>),
    Numerical(SortOrder),
    Alphabetical(SortOrder),
}

/// A policy with its pattern and range compiled
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    filter: Option<Regex>,
    capture: Option<String>,
    order: Option<Order>,
}

/// A surviving tag and the value it is compared on
struct TaggedValue<'a> {
    tag: &'a str,
    value: &'a str,
}

impl CompiledPolicy {
    /// Compile a policy, failing only on a bad pattern or range
    pub fn compile(policy: &ImagePolicy) -> Result<Self> {
        let filter = match &policy.filter {
            Some(filter) => Some(Regex::new(&filter.pattern).map_err(|e| {
                PolicyError::InvalidPattern {
                    pattern: filter.pattern.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        let capture = policy
            .filter
            .as_ref()
            .and_then(|f| f.capture_name())
            .map(str::to_string);

        let order = match policy.ordering() {
            Some(OrderingClause::Semver(semver)) => {
                let range = match semver.range.as_deref().map(str::trim) {
                    Some(range) if !range.is_empty() => Some(VersionRange::parse(range)?),
                    _ => None,
                };
                Some(Order::Semver(range))
            }
            Some(OrderingClause::Numerical(numerical)) => Some(Order::Numerical(numerical.order)),
            Some(OrderingClause::Alphabetical(alphabetical)) => {
                Some(Order::Alphabetical(alphabetical.order))
            }
            None => None,
        };

        Ok(Self {
            filter,
            capture,
            order,
        })
    }

    /// A policy with no ordering clause
    pub fn fallback() -> Self {
        Self {
            filter: None,
            capture: None,
            order: None,
        }
    }

    /// Whether this policy has an ordering clause
    pub fn is_fallback(&self) -> bool {
        self.order.is_none()
    }

    /// Capture group the filter's `extract` names, if any
    pub fn capture(&self) -> Option<&str> {
        self.capture.as_deref()
    }

    /// Whether the filter pattern defines the named capture group
    pub fn pattern_has_capture(&self, name: &str) -> bool {
        self.filter
            .as_ref()
            .is_some_and(|re| re.capture_names().flatten().any(|n| n == name))
    }

    /// Select a tag, or `None` when nothing qualifies
    pub fn select<S: AsRef<str>>(&self, tags: &[S]) -> Option<Selection> {
        let tags: Vec<&str> = tags
            .iter()
            .map(|t| t.as_ref())
            .filter(|t| !is_digest_tag(t))
            .collect();
        if tags.is_empty() {
            return None;
        }

        let Some(order) = &self.order else {
            return fallback_select(&tags).map(|tag| Selection {
                tag: tag.to_string(),
                source: PolicySource::Fallback,
            });
        };

        let values = self.tagged_values(&tags);
        if values.is_empty() {
            return None;
        }

        let (tag, source) = match order {
            Order::Semver(range) => (select_semver(&values, range.as_ref())?, PolicySource::Semver),
            Order::Numerical(order) => (select_numerical(&values, *order)?, PolicySource::Numerical),
            Order::Alphabetical(order) => (
                select_alphabetical(&values, *order)?,
                PolicySource::Alphabetical,
            ),
        };
        Some(Selection {
            tag: tag.to_string(),
            source,
        })
    }

    fn tagged_values<'a>(&self, tags: &[&'a str]) -> Vec<TaggedValue<'a>> {
        let Some(filter) = &self.filter else {
            return tags
                .iter()
                .map(|&tag| TaggedValue { tag, value: tag })
                .collect();
        };

        tags.iter()
            .filter_map(|&tag| match &self.capture {
                Some(name) => filter
                    .captures(tag)
                    .and_then(|caps| caps.name(name))
                    .map(|m| TaggedValue {
                        tag,
                        value: m.as_str(),
                    }),
                None => filter.is_match(tag).then_some(TaggedValue { tag, value: tag }),
            })
            .collect()
    }
}

/// Evaluate an optional policy against a tag list
pub fn select_tag<S: AsRef<str>>(
    tags: &[S],
    policy: Option<&ImagePolicy>,
) -> Result<Option<Selection>> {
    let compiled = match policy {
        Some(policy) => CompiledPolicy::compile(policy)?,
        None => CompiledPolicy::fallback(),
    };
    Ok(compiled.select(tags))
}

/// Prefer released semver tags, otherwise any tag; greatest by text either way
fn fallback_select<'a>(tags: &[&'a str]) -> Option<&'a str> {
    let released = tags
        .iter()
        .copied()
        .filter(|t| parse_lenient(t).is_some_and(|v| v.pre.is_empty()))
        .max();
    released.or_else(|| tags.iter().copied().max())
}

fn select_semver<'a>(values: &[TaggedValue<'a>], range: Option<&VersionRange>) -> Option<&'a str> {
    if values.iter().all(|tv| is_all_digits(tv.value)) {
        return None;
    }

    values
        .iter()
        .filter_map(|tv| parse_lenient(tv.value).map(|version| (version, tv.tag)))
        .filter(|(version, _)| range.map_or(true, |r| r.matches(version)))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, tag)| tag)
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn parse(value: &str) -> Option<Self> {
        if let Ok(n) = value.parse::<i64>() {
            return Some(Number::Int(n));
        }
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Number::Float)
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    fn compare(self, other: Self) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }
}

fn select_numerical<'a>(values: &[TaggedValue<'a>], order: SortOrder) -> Option<&'a str> {
    let mut numbers: Vec<(Number, &str)> = values
        .iter()
        .filter_map(|tv| Number::parse(tv.value).map(|n| (n, tv.tag)))
        .collect();
    numbers.sort_by(|a, b| a.0.compare(b.0).then_with(|| a.1.cmp(b.1)));
    pick(&numbers, order).map(|(_, tag)| *tag)
}

fn select_alphabetical<'a>(values: &[TaggedValue<'a>], order: SortOrder) -> Option<&'a str> {
    let mut sorted: Vec<(&str, &str)> = values.iter().map(|tv| (tv.value, tv.tag)).collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()).then_with(|| a.1.cmp(b.1)));
    pick(&sorted, order).map(|(_, tag)| *tag)
}

fn pick<T>(sorted: &[T], order: SortOrder) -> Option<&T> {
    match order {
        SortOrder::Asc => sorted.first(),
        SortOrder::Desc => sorted.last(),
    }
}
