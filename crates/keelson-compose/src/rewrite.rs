//! In-place `image:` rewrite
//!
//! The rewrite is line-oriented so comments, anchors, quoting and key order
//! survive untouched. A service block starts at a header line under
//! `services:` and ends at the next sibling header or at the first line that
//! leaves the `services:` block. Inside a block only the service's own
//! `image:` key (at the block's first property indent) is replaced.

use crate::error::{ComposeError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the backup written next to the compose file before a rewrite
pub const BACKUP_FILE_NAME: &str = "docker-compose.backup.yml";

struct Patterns {
    services: Regex,
    service: Regex,
    image: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            services: Regex::new(r#"^services:\s*(#.*)?$"#)?,
            service: Regex::new(r#"^(\s+)["']?([A-Za-z0-9._-]+)["']?:\s*(#.*)?$"#)?,
            image: Regex::new(r#"^(\s+image:\s*)(["']?)([^"'\s#]+)(["']?)(\s*(?:#.*)?)$"#)?,
        })
    }
}

/// Result of rewriting compose text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// New file content
    pub content: String,

    /// Services whose `image:` line now carries a different value
    pub rewritten: Vec<String>,

    /// Requested services with no `image:` line to rewrite
    pub missing: Vec<String>,
}

impl Rewrite {
    pub fn is_changed(&self) -> bool {
        !self.rewritten.is_empty()
    }
}

/// Outcome of rewriting a compose file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub rewritten: Vec<String>,
    pub missing: Vec<String>,

    /// Backup path, when the file was changed
    pub backup: Option<PathBuf>,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Replace the `image:` value of each service in `images` (service -> image)
pub fn rewrite_images(content: &str, images: &BTreeMap<String, String>) -> Result<Rewrite> {
    let patterns = Patterns::new()?;
    let mut out = String::with_capacity(content.len());
    let mut rewritten = BTreeSet::new();
    let mut found = BTreeSet::new();

    let mut in_services = false;
    let mut service_indent: Option<usize> = None;
    let mut current: Option<&str> = None;
    let mut property_indent: Option<usize> = None;

    for raw in content.split_inclusive('\n') {
        let (line, ending) = split_ending(raw);

        if !is_blank_or_comment(line) {
            let indent = indent_of(line);
            if indent == 0 {
                in_services = patterns.services.is_match(line);
                service_indent = None;
                current = None;
            } else if in_services {
                let header_indent = *service_indent.get_or_insert(indent);
                if indent < header_indent {
                    in_services = false;
                    current = None;
                } else if indent == header_indent {
                    current = patterns
                        .service
                        .captures(line)
                        .and_then(|caps| caps.get(2))
                        .map(|m| m.as_str())
                        .filter(|name| images.contains_key(*name));
                    property_indent = None;
                } else if let Some(service) = current {
                    let own_indent = *property_indent.get_or_insert(indent);
                    if indent == own_indent {
                        if let Some(caps) = patterns.image.captures(line) {
                            if let Some(image) = images.get(service) {
                                found.insert(service.to_string());
                                let old = caps.get(3).map_or("", |m| m.as_str());
                                if old != image {
                                    out.push_str(&format!(
                                        "{}{}{}{}{}",
                                        &caps[1], &caps[2], image, &caps[4], &caps[5]
                                    ));
                                    out.push_str(ending);
                                    rewritten.insert(service.to_string());
                                    continue;
                                }
                            }
                        }
                    }
                }
            }
        }

        out.push_str(raw);
    }

    let missing = images
        .keys()
        .filter(|service| !found.contains(*service))
        .cloned()
        .collect();

    Ok(Rewrite {
        content: out,
        rewritten: rewritten.into_iter().collect(),
        missing,
    })
}

fn split_ending(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

/// Sibling backup path for a compose file
pub fn backup_path(compose: &Path) -> PathBuf {
    compose.with_file_name(BACKUP_FILE_NAME)
}

/// Rewrite `image:` lines in a compose file, writing a sibling backup first.
///
/// The file is left byte-for-byte untouched (and no backup is written) when
/// every requested image is already in place.
pub fn rewrite_file(path: &Path, images: &BTreeMap<String, String>) -> Result<RewriteOutcome> {
    let failed = |reason: String| ComposeError::RewriteFailed {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|source| ComposeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let rewrite = rewrite_images(&content, images)?;

    if !rewrite.is_changed() {
        debug!(path = %path.display(), "compose file already up to date");
        return Ok(RewriteOutcome {
            rewritten: Vec::new(),
            missing: rewrite.missing,
            backup: None,
        });
    }

    let backup = backup_path(path);
    std::fs::write(&backup, &content)
        .map_err(|e| failed(format!("writing backup {}: {}", backup.display(), e)))?;

    let staging = path.with_extension("keelson.tmp");
    std::fs::write(&staging, &rewrite.content)
        .map_err(|e| failed(format!("writing {}: {}", staging.display(), e)))?;
    std::fs::rename(&staging, path).map_err(|e| failed(format!("replacing file: {}", e)))?;

    info!(
        path = %path.display(),
        services = ?rewrite.rewritten,
        "compose file rewritten"
    );

    Ok(RewriteOutcome {
        rewritten: rewrite.rewritten,
        missing: rewrite.missing,
        backup: Some(backup),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = r#"# production stack
version: "3.8"

services:
  web:
    image: nginx:1.25   # pinned
    depends_on:
      - api
    environment:
      image: not-this-one
  api:
    build:
      context: .
    image: "ghcr.io/org/api:v1.2.3"
  "db":
    image: postgres:16

volumes:
  web:
    driver: local
"#;

    fn images(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(s, i)| (s.to_string(), i.to_string()))
            .collect()
    }

    #[test]
    fn test_rewrites_only_target_line() {
        let rewrite = rewrite_images(COMPOSE, &images(&[("web", "nginx:1.27")])).unwrap();
        assert_eq!(rewrite.rewritten, vec!["web"]);
        assert!(rewrite.missing.is_empty());
        assert_eq!(
            rewrite.content,
            COMPOSE.replace("image: nginx:1.25   # pinned", "image: nginx:1.27   # pinned")
        );
        assert!(rewrite.content.contains("image: not-this-one"));
    }

    #[test]
    fn test_preserves_quotes() {
        let rewrite = rewrite_images(COMPOSE, &images(&[("api", "ghcr.io/org/api:v1.3.0")])).unwrap();
        assert!(rewrite
            .content
            .contains(r#"    image: "ghcr.io/org/api:v1.3.0""#));
    }

    #[test]
    fn test_quoted_header() {
        let rewrite = rewrite_images(COMPOSE, &images(&[("db", "postgres:17")])).unwrap();
        assert_eq!(rewrite.rewritten, vec!["db"]);
        assert!(rewrite.content.contains("    image: postgres:17\n"));
    }

    #[test]
    fn test_same_image_is_byte_identical() {
        let rewrite = rewrite_images(
            COMPOSE,
            &images(&[("web", "nginx:1.25"), ("db", "postgres:16")]),
        )
        .unwrap();
        assert!(!rewrite.is_changed());
        assert_eq!(rewrite.content, COMPOSE);
    }

    #[test]
    fn test_missing_service_reported() {
        let rewrite = rewrite_images(COMPOSE, &images(&[("ghost", "x:1")])).unwrap();
        assert_eq!(rewrite.missing, vec!["ghost"]);
        assert_eq!(rewrite.content, COMPOSE);
    }

    #[test]
    fn test_other_top_level_blocks_ignored() {
        // `volumes.web` must not be mistaken for the `web` service
        let text = "volumes:\n  web:\n    image: fake\nservices:\n  web:\n    image: nginx:1\n";
        let rewrite = rewrite_images(text, &images(&[("web", "nginx:2")])).unwrap();
        assert_eq!(
            rewrite.content,
            "volumes:\n  web:\n    image: fake\nservices:\n  web:\n    image: nginx:2\n"
        );
    }

    #[test]
    fn test_crlf_preserved() {
        let text = "services:\r\n  web:\r\n    image: nginx:1\r\n";
        let rewrite = rewrite_images(text, &images(&[("web", "nginx:2")])).unwrap();
        assert_eq!(rewrite.content, "services:\r\n  web:\r\n    image: nginx:2\r\n");
    }

    #[test]
    fn test_rewrite_file_writes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(&path, COMPOSE).unwrap();

        let outcome = rewrite_file(&path, &images(&[("web", "nginx:1.27")])).unwrap();
        assert_eq!(outcome.rewritten, vec!["web"]);

        let backup = outcome.backup.unwrap();
        assert_eq!(backup, dir.path().join(BACKUP_FILE_NAME));
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), COMPOSE);
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("image: nginx:1.27"));
    }

    #[test]
    fn test_rewrite_file_noop_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(&path, COMPOSE).unwrap();

        let outcome = rewrite_file(&path, &images(&[("web", "nginx:1.25")])).unwrap();
        assert!(outcome.backup.is_none());
        assert!(!dir.path().join(BACKUP_FILE_NAME).exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), COMPOSE);
    }

    #[test]
    fn test_rewrite_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = rewrite_file(&dir.path().join("nope.yml"), &images(&[("web", "x")]));
        assert!(matches!(result, Err(ComposeError::Read { .. })));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Rewriting to what is already there changes nothing.
            #[test]
            fn rewrite_with_current_images_is_identity(
                tags in prop::collection::vec("[a-z0-9][a-z0-9.-]{0,10}", 1..5),
            ) {
                let mut text = String::from("services:\n");
                let mut current = BTreeMap::new();
                for (i, tag) in tags.iter().enumerate() {
                    let service = format!("svc{}", i);
                    let image = format!("registry.local/app{}:{}", i, tag);
                    text.push_str(&format!("  {}:\n    # comment\n    image: {}\n", service, image));
                    current.insert(service, image);
                }

                let rewrite = rewrite_images(&text, &current).unwrap();
                prop_assert!(!rewrite.is_changed());
                prop_assert_eq!(rewrite.content, text);
            }
        }
    }
}
