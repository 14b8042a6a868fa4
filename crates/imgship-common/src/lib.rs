//! imgship-common - Shared types and defaults
//!
//! This crate holds the pieces of imgship that carry no AWS SDK
//! dependencies, so test helpers and tooling can use them cheaply.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values (delays, attempts, build environment)
//! - [`resource_kind`]: Transient resource kinds and their reclaim order
//! - [`run_id`]: Per-invocation identifier used for unique names and tags
//! - [`status`]: Remote build status values and their classification
//! - [`tags`]: AWS resource tag constants

pub mod defaults;
pub mod resource_kind;
pub mod run_id;
pub mod status;
pub mod tags;

pub use resource_kind::ResourceKind;
pub use run_id::RunId;
pub use status::BuildStatus;
