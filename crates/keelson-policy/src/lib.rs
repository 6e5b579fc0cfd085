//! # Keelson Policy
//!
//! Tag selection under a declarative image policy.
//!
//! A policy is an optional regex filter (optionally comparing on a named
//! capture) plus at most one ordering clause:
//!
//! - **semver**: greatest semantic version, optionally within a range;
//!   never falls back to text ordering when nothing parses
//! - **numerical**: integer or float comparison, `asc` or `desc`
//! - **alphabetical**: byte-wise comparison, `asc` or `desc`
//!
//! With no ordering clause the evaluator prefers released semver tags and
//! otherwise takes the greatest tag by text.
//!
//! ## Example
//!
//! ```rust
//! use keelson_policy::select_tag;
//! use keelson_types::{ImagePolicy, SortOrder, TagFilter};
//!
//! let policy = ImagePolicy::numerical(SortOrder::Desc)
//!     .with_filter(TagFilter::new(r"^main-[a-z0-9]+-(?P<ts>\d+)$").with_extract("$ts"));
//! let tags = ["main-abc123-100", "main-def456-200", "main-ghi789-150"];
//!
//! let selection = select_tag(&tags, Some(&policy)).unwrap().unwrap();
//! assert_eq!(selection.tag, "main-def456-200");
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod evaluator;
pub mod version;

pub use error::{PolicyError, Result};
pub use evaluator::{select_tag, CompiledPolicy, Selection};
pub use version::{parse_lenient, VersionRange};
