//! Pipeline error taxonomy
//!
//! Each variant is a distinct terminal outcome the CLI reports differently.
//! Collaborator errors are carried as `anyhow::Error` sources so the full
//! chain (including the classified [`AwsError`](crate::aws::AwsError)) is
//! preserved.

use crate::config::ConfigError;
use imgship_common::BuildStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which identity step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStage {
    LookupRole,
    RemoveRole,
    CreateRole,
    LookupPolicy,
    RemovePolicy,
    CreatePolicy,
    AttachPolicy,
}

impl std::fmt::Display for IdentityStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IdentityStage::LookupRole => "look up role",
            IdentityStage::RemoveRole => "remove existing role",
            IdentityStage::CreateRole => "create role",
            IdentityStage::LookupPolicy => "look up policy",
            IdentityStage::RemovePolicy => "remove existing policy",
            IdentityStage::CreatePolicy => "create policy",
            IdentityStage::AttachPolicy => "attach policy",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration")]
    Config(#[from] ConfigError),

    #[error("Failed to {stage} {name}")]
    IdentityProvisioning {
        stage: IdentityStage,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to {step}")]
    Preparation {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to package {}", path.display())]
    Packaging {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to upload s3://{bucket}/{key}")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Build submission for {project} abandoned after {attempts} attempt(s)")]
    Submission {
        project: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Build {build_id} finished with status {status}")]
    BuildFailure { build_id: String, status: BuildStatus },

    #[error("Build {build_id} did not finish within {}s", waited.as_secs())]
    PollTimeout { build_id: String, waited: Duration },

    #[error("Failed to poll status of build {build_id}")]
    StatusPoll {
        build_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cancelled while {during}")]
    Cancelled { during: String },

    #[error("Function {function} creation failed after {attempts} attempt(s)")]
    DeploymentCreation {
        function: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Function {function} not visible after {attempts} attempt(s)")]
    VisibilityTimeout { function: String, attempts: u32 },

    #[error("Failed to check whether function {function} exists")]
    VisibilityCheck {
        function: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Short machine-friendly name of the outcome
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::IdentityProvisioning { .. } => "identity-provisioning",
            PipelineError::Preparation { .. } => "preparation",
            PipelineError::Packaging { .. } => "packaging",
            PipelineError::Upload { .. } => "upload",
            PipelineError::Submission { .. } => "submission",
            PipelineError::BuildFailure { .. } => "build-failure",
            PipelineError::PollTimeout { .. } => "poll-timeout",
            PipelineError::StatusPoll { .. } => "status-poll",
            PipelineError::Cancelled { .. } => "cancelled",
            PipelineError::DeploymentCreation { .. } => "deployment-creation",
            PipelineError::VisibilityTimeout { .. } => "visibility-timeout",
            PipelineError::VisibilityCheck { .. } => "visibility-check",
        }
    }
}
