//! # Keelson Compose
//!
//! The compose file as the reconciler sees it:
//!
//! - [`ComposeFile`]: `services.<name>.{image, scale, deploy.replicas, depends_on}`
//! - [`DependencyGraph`]: dependencies-first update order with cycle detection
//! - [`rewrite_file`]: line-oriented `image:` replacement with a sibling
//!   `docker-compose.backup.yml`

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod graph;
pub mod model;
pub mod rewrite;

pub use error::{ComposeError, Result};
pub use graph::DependencyGraph;
pub use model::{ComposeFile, DependsOn, Deploy, ServiceDef};
pub use rewrite::{
    backup_path, rewrite_file, rewrite_images, Rewrite, RewriteOutcome, BACKUP_FILE_NAME,
};
