//! CodeBuild project and build management

use crate::aws::context::AwsContext;
use crate::aws::error::{AwsError, classify_sdk_error};
use crate::aws::tags::codebuild_tags;
use anyhow::{Context, Result};
use aws_sdk_codebuild::Client;
use aws_sdk_codebuild::types::{
    ArtifactsType, ComputeType, EnvironmentType, ProjectArtifacts, ProjectEnvironment,
    ProjectSource, SourceType,
};
use imgship_common::BuildStatus;
use tracing::{debug, info};

/// Everything needed to register a build project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProjectSpec {
    /// Project name
    pub name: String,
    /// Bucket holding the source archive
    pub source_bucket: String,
    /// Key of the source archive
    pub source_key: String,
    /// Bucket receiving build artifacts
    pub artifact_bucket: String,
    /// Compute class (e.g. `BUILD_GENERAL1_SMALL`)
    pub compute_type: String,
    /// Container image the build runs in
    pub build_image: String,
    /// Privileged mode, required for `docker build`
    pub privileged: bool,
    /// ARN of the role CodeBuild assumes
    pub service_role_arn: String,
    /// Image the project produces (for tagging)
    pub image_name: String,
    /// Invocation that created the project (for tagging)
    pub run_id: String,
}

impl BuildProjectSpec {
    /// `bucket/key` form CodeBuild expects for S3 sources
    pub fn source_location(&self) -> String {
        format!("{}/{}", self.source_bucket, self.source_key)
    }
}

/// CodeBuild client for build projects
pub struct CodeBuildClient {
    client: Client,
}

impl CodeBuildClient {
    /// Create a CodeBuild client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.codebuild_client(),
        }
    }

    /// Register a build project
    pub async fn create_project(&self, spec: &BuildProjectSpec) -> Result<()> {
        info!(project = %spec.name, source = %spec.source_location(), "Creating build project");

        let source = ProjectSource::builder()
            .r#type(SourceType::S3)
            .location(spec.source_location())
            .build()
            .context("Failed to build project source")?;

        let artifacts = ProjectArtifacts::builder()
            .r#type(ArtifactsType::S3)
            .location(&spec.artifact_bucket)
            .build()
            .context("Failed to build project artifacts")?;

        let environment = ProjectEnvironment::builder()
            .r#type(EnvironmentType::LinuxContainer)
            .compute_type(ComputeType::from(spec.compute_type.as_str()))
            .image(&spec.build_image)
            .privileged_mode(spec.privileged)
            .build()
            .context("Failed to build project environment")?;

        self.client
            .create_project()
            .name(&spec.name)
            .source(source)
            .artifacts(artifacts)
            .environment(environment)
            .service_role(&spec.service_role_arn)
            .set_tags(Some(codebuild_tags(&spec.run_id, &spec.image_name)))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to create build project {}", spec.name))?;

        debug!(project = %spec.name, "Build project created");
        Ok(())
    }

    /// Start a build of a project, returning the build id
    pub async fn start_build(&self, project_name: &str) -> Result<String> {
        let out = self
            .client
            .start_build()
            .project_name(project_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to start build of {project_name}"))?;

        let build_id = out
            .build_value()
            .and_then(|b| b.id())
            .map(str::to_string)
            .context("StartBuild returned no build id")?;

        info!(project = %project_name, build_id = %build_id, "Build started");
        Ok(build_id)
    }

    /// Current status of a build
    pub async fn build_status(&self, build_id: &str) -> Result<BuildStatus> {
        let out = self
            .client
            .batch_get_builds()
            .ids(build_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to get status of build {build_id}"))?;

        let Some(build) = out.builds().first() else {
            return Err(anyhow::Error::new(AwsError::NotFound {
                resource_type: "build",
                resource_id: build_id.to_string(),
            }));
        };

        let raw = build
            .build_status()
            .map(|s| s.as_str())
            .context("Build has no status")?;

        BuildStatus::parse(raw).with_context(|| format!("Unknown build status: {raw}"))
    }

    /// Ask CodeBuild to stop a running build
    pub async fn stop_build(&self, build_id: &str) -> Result<()> {
        self.client
            .stop_build()
            .id(build_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to stop build {build_id}"))?;

        info!(build_id = %build_id, "Stop requested");
        Ok(())
    }

    /// Delete a build project
    pub async fn delete_project(&self, project_name: &str) -> Result<()> {
        self.client
            .delete_project()
            .name(project_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to delete build project {project_name}"))?;

        debug!(project = %project_name, "Build project deleted");
        Ok(())
    }
}

/// Trait for CodeBuild operations that can be mocked in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait BuildOperations: Send + Sync {
    /// Register a build project
    async fn create_project(&self, spec: &BuildProjectSpec) -> Result<()>;

    /// Start a build, returning its id
    async fn start_build(&self, project_name: &str) -> Result<String>;

    /// Current status of a build
    async fn build_status(&self, build_id: &str) -> Result<BuildStatus>;

    /// Ask the service to stop a build
    async fn stop_build(&self, build_id: &str) -> Result<()>;

    /// Delete a build project
    async fn delete_project(&self, project_name: &str) -> Result<()>;
}

impl BuildOperations for CodeBuildClient {
    async fn create_project(&self, spec: &BuildProjectSpec) -> Result<()> {
        CodeBuildClient::create_project(self, spec).await
    }

    async fn start_build(&self, project_name: &str) -> Result<String> {
        CodeBuildClient::start_build(self, project_name).await
    }

    async fn build_status(&self, build_id: &str) -> Result<BuildStatus> {
        CodeBuildClient::build_status(self, build_id).await
    }

    async fn stop_build(&self, build_id: &str) -> Result<()> {
        CodeBuildClient::stop_build(self, build_id).await
    }

    async fn delete_project(&self, project_name: &str) -> Result<()> {
        CodeBuildClient::delete_project(self, project_name).await
    }
}
