//! Core types for the build and deploy pipeline

use crate::aws::{AccountId, BuildProjectSpec};
use crate::orchestrator::cleanup::ReclaimReport;
use imgship_common::{BuildStatus, RunId};
use std::time::Duration;
use tracing::debug;

/// Derive the build project name for an image.
///
/// `codebuild_<image>_project`, with every character outside
/// `[A-Za-z0-9_-]` replaced by `_`. With a run id the short form of it is
/// appended so concurrent invocations on the same image get distinct
/// projects.
pub fn project_name(image_name: &str, run_id: Option<&RunId>) -> String {
    let sanitized: String = image_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match run_id {
        Some(run) => format!("codebuild_{sanitized}_project_{}", run.short()),
        None => format!("codebuild_{sanitized}_project"),
    }
}

/// Name of the image a base-image build produces
pub fn base_image_name(repository: &str, tag: &str) -> String {
    format!("{repository}_{tag}_base_image")
}

/// Location of an uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Coordinates of an image in ECR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub account_id: AccountId,
    pub region: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// `<account>.dkr.ecr.<region>.amazonaws.com`
    pub fn registry(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region)
    }

    /// `<registry>/<repository>:<tag>`
    pub fn uri(&self) -> String {
        format!("{}/{}:{}", self.registry(), self.repository, self.tag)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Lifecycle of one build job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    NotSubmitted,
    Submitted,
    Polling,
    /// Terminal status observed
    Finished(BuildStatus),
}

/// One remote build, tracked from submission to its terminal status
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub spec: BuildProjectSpec,
    pub build_id: Option<String>,
    phase: JobPhase,
}

impl BuildJob {
    pub fn new(spec: BuildProjectSpec) -> Self {
        Self {
            spec,
            build_id: None,
            phase: JobPhase::NotSubmitted,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Move to the next phase.
    ///
    /// A finished job never changes phase again.
    pub fn advance(&mut self, next: JobPhase) {
        if matches!(self.phase, JobPhase::Finished(_)) {
            return;
        }
        debug!(project = %self.spec.name, from = ?self.phase, to = ?next, "Build job phase");
        self.phase = next;
    }
}

/// A provisioned role/policy pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedIdentity {
    pub role_name: String,
    pub role_arn: String,
    pub policy_arn: String,
}

/// Result of a build that reached `SUCCEEDED`
#[derive(Debug)]
pub struct BuildOutcome {
    pub project_name: String,
    pub build_id: String,
    pub status: BuildStatus,
    /// Status polls made
    pub polls: u32,
    /// Time from first poll to terminal status
    pub elapsed: Duration,
    /// Submission attempts used
    pub submit_attempts: u32,
    pub reclaim: ReclaimReport,
}

/// Result of a successful deployment
#[derive(Debug)]
pub struct Deployment {
    pub function_name: String,
    pub function_arn: String,
    /// Lifecycle state reported once the function became visible
    pub function_state: Option<String>,
    pub image_uri: String,
    /// Where the deployment archive was uploaded; the function reads it at runtime
    pub archive: ObjectLocation,
    pub create_attempts: u32,
    pub visibility_attempts: u32,
    pub reclaim: ReclaimReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_name_replaces_unsafe_characters() {
        assert_eq!(
            project_name("models/sklearn:v1", None),
            "codebuild_models_sklearn_v1_project"
        );
        assert_eq!(
            project_name("models_sklearn_base_image", None),
            "codebuild_models_sklearn_base_image_project"
        );
    }

    #[test]
    fn project_name_appends_run_token() {
        let run = RunId::from_string("abcdef0123456789");
        assert_eq!(
            project_name("base", Some(&run)),
            "codebuild_base_project_abcdef01"
        );
    }

    #[test]
    fn image_uri_format() {
        let image = ImageRef {
            account_id: AccountId::parse("123456789012").unwrap(),
            region: "us-east-1".to_string(),
            repository: "models".to_string(),
            tag: "latest".to_string(),
        };
        assert_eq!(
            image.uri(),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/models:latest"
        );
        assert_eq!(image.to_string(), image.uri());
    }

    #[test]
    fn finished_job_keeps_its_status() {
        let spec = BuildProjectSpec {
            name: "p".to_string(),
            source_bucket: "b".to_string(),
            source_key: "k.zip".to_string(),
            artifact_bucket: "b".to_string(),
            compute_type: "BUILD_GENERAL1_SMALL".to_string(),
            build_image: "aws/codebuild/standard:5.0".to_string(),
            privileged: true,
            service_role_arn: "arn".to_string(),
            image_name: "i".to_string(),
            run_id: "r".to_string(),
        };
        let mut job = BuildJob::new(spec);
        assert_eq!(job.phase(), JobPhase::NotSubmitted);
        job.advance(JobPhase::Submitted);
        job.advance(JobPhase::Polling);
        job.advance(JobPhase::Finished(BuildStatus::Failed));
        job.advance(JobPhase::Polling);
        assert_eq!(job.phase(), JobPhase::Finished(BuildStatus::Failed));
    }
}
