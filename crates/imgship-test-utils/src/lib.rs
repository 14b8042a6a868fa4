//! Shared test utilities for imgship
//!
//! This crate provides helpers used by unit tests, scenario tests and the
//! `#[ignore]`d live AWS integration tests.
//!
//! ## Modules
//!
//! - [`aws`]: Region, bucket and namespace names for live AWS tests
//! - [`fs`]: Source-tree fixtures on disk

pub mod aws;
pub mod fs;

pub use aws::{MAX_NAMESPACE_LEN, live_bucket, live_namespace, live_region};
pub use fs::{SourceTree, read_tree};
