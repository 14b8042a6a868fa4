//! Build and deploy orchestration
//!
//! Each entry point drives exactly one job to a terminal outcome and
//! reclaims every transient resource it created on the way out:
//!
//! - [`BuildPipeline`]: package, upload, provision the CodeBuild identity,
//!   then hand off to [`BuildJobRunner`]
//! - [`BuildJobRunner`]: submit with bounded retries, poll to a terminal
//!   status, delete the project and the archive
//! - [`DeploymentProvisioner`]: upload a function archive, provision the
//!   function identity, create the function and wait until it is visible

pub mod build;
pub mod cleanup;
pub mod deploy;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod policies;
pub mod progress;
pub mod types;

pub use build::BuildJobRunner;
pub use cleanup::{CleanupResult, ReclaimReport, ReclaimStep, ResourceReclaimer};
pub use deploy::{DeploymentProvisioner, DeploymentRequest};
pub use error::{IdentityStage, PipelineError};
pub use identity::IdentityProvisioner;
pub use pipeline::BuildPipeline;
pub use policies::ExecutionIdentity;
pub use progress::{ChannelReporter, LogReporter, PipelinePhase, ProgressEvent, ProgressReporter};
pub use types::{
    BuildJob, BuildOutcome, Deployment, ImageRef, JobPhase, ObjectLocation, ProvisionedIdentity,
    base_image_name, project_name,
};
