//! # Keelson Registry
//!
//! Lists the tags published for an image.
//!
//! [`TagLister`] is the contract the reconciler consumes. [`RegistryClients`]
//! implements it against real registries over the distribution API, choosing
//! the endpoint and credentials by registry kind; [`StaticTagLister`] serves
//! fixed lists for tests and dry runs.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod auth;
pub mod client;
pub mod clients;
pub mod error;
pub mod lister;

pub use auth::{Auth, Challenge};
pub use client::{DistributionClient, DEFAULT_PAGE_SIZE};
pub use clients::RegistryClients;
pub use error::{RegistryError, Result};
pub use lister::{StaticTagLister, TagLister};
