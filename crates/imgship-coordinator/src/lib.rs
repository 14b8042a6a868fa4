//! imgship-coordinator - builds container images and deploys them as functions
//!
//! This crate packages a build context, runs the image build on CodeBuild,
//! and registers Lambda functions backed by the resulting image. Every
//! transient cloud resource an invocation creates is reclaimed before it
//! returns.

pub mod archive;
pub mod aws;
pub mod config;
pub mod orchestrator;
pub mod staging;
pub mod wait;
