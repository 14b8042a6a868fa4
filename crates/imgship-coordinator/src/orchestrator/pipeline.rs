//! Image build pipeline
//!
//! Packages a build context, uploads it, provisions the CodeBuild identity
//! and hands the job to [`BuildJobRunner`]. The base-image entry point also
//! prepares the bucket and repository and stages the context itself.

use super::build::BuildJobRunner;
use super::cleanup::{LocalResource, ResourceReclaimer, reclaim_local};
use super::error::PipelineError;
use super::identity::IdentityProvisioner;
use super::policies::ExecutionIdentity;
use super::progress::{PipelinePhase, ProgressReporter};
use super::types::{BuildOutcome, ObjectLocation, base_image_name, project_name};
use crate::archive::package_directory;
use crate::aws::{
    AccountId, BuildOperations, BuildProjectSpec, IdentityOperations, RegistryOperations,
    StorageOperations,
};
use crate::config::{ForgeConfig, validate_name};
use crate::staging::{BaseImageContext, stage_base_image};
use crate::wait::Clock;
use imgship_common::RunId;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Builds images on CodeBuild from local build contexts
pub struct BuildPipeline<'a, I, S, B, R, C> {
    iam: &'a I,
    storage: &'a S,
    codebuild: &'a B,
    registry: &'a R,
    clock: &'a C,
    reporter: &'a dyn ProgressReporter,
    config: &'a ForgeConfig,
    account: &'a AccountId,
    run_id: &'a RunId,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, I, S, B, R, C> BuildPipeline<'a, I, S, B, R, C>
where
    I: IdentityOperations,
    S: StorageOperations,
    B: BuildOperations,
    R: RegistryOperations,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        iam: &'a I,
        storage: &'a S,
        codebuild: &'a B,
        registry: &'a R,
        clock: &'a C,
        reporter: &'a dyn ProgressReporter,
        config: &'a ForgeConfig,
        account: &'a AccountId,
        run_id: &'a RunId,
    ) -> Self {
        Self {
            iam,
            storage,
            codebuild,
            registry,
            clock,
            reporter,
            config,
            account,
            run_id,
            cancel: None,
        }
    }

    /// Abandon the build when `token` fires
    pub fn with_cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|t| t.is_cancelled())
    }

    /// Build the image `image_name` from the build context in `source_dir`.
    ///
    /// The context must contain a `buildspec.yml`. The uploaded archive and
    /// the build project are deleted before returning.
    #[instrument(skip_all, fields(image = %image_name))]
    pub async fn build_from_directory(
        &self,
        source_dir: &Path,
        image_name: &str,
    ) -> Result<BuildOutcome, PipelineError> {
        validate_name("image name", image_name, &['-', '_', '.', '/'], 200)?;
        let bucket = &self.config.aws.bucket;
        let location = ObjectLocation {
            bucket: bucket.clone(),
            key: format!("{image_name}.zip"),
        };

        self.reporter.report_phase(PipelinePhase::Packaging);
        let file_name = format!("{}.zip", image_name.replace('/', "_"));
        let archive = package_directory(source_dir, &file_name)
            .await
            .map_err(|source| PipelineError::Packaging {
                path: source_dir.to_path_buf(),
                source,
            })?;
        info!(
            entries = archive.entries().len(),
            archive = %archive.path().display(),
            "Build context packaged"
        );

        if self.is_cancelled() {
            self.reporter.report_phase(PipelinePhase::Reclaiming);
            reclaim_local(vec![LocalResource::Archive(archive)], self.reporter);
            return Err(PipelineError::Cancelled {
                during: format!("uploading {location}"),
            });
        }

        self.reporter.report_phase(PipelinePhase::Uploading);
        let uploaded = self
            .storage
            .upload_file(&location.bucket, &location.key, archive.path())
            .await;
        let mut local = reclaim_local(vec![LocalResource::Archive(archive)], self.reporter);
        uploaded.map_err(|source| PipelineError::Upload {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            source,
        })?;

        let reclaimer = ResourceReclaimer::new(self.codebuild, self.storage, self.reporter);
        if self.is_cancelled() {
            self.reporter.report_phase(PipelinePhase::Reclaiming);
            reclaimer.reclaim_archive(&location).await;
            return Err(PipelineError::Cancelled {
                during: "provisioning the build identity".to_string(),
            });
        }

        self.reporter
            .report_phase(PipelinePhase::ProvisioningIdentity);
        let identity = ExecutionIdentity::codebuild(bucket);
        let provisioned = IdentityProvisioner::new(
            self.iam,
            self.clock,
            self.account,
            self.run_id,
            self.config.retry.settle_delay,
        )
        .provision(&identity)
        .await;
        let provisioned = match provisioned {
            Ok(provisioned) => provisioned,
            Err(e) => {
                self.reporter.report_phase(PipelinePhase::Reclaiming);
                reclaimer.reclaim_archive(&location).await;
                return Err(e);
            }
        };

        let build = &self.config.build;
        let run_token = build.unique_project_names.then_some(self.run_id);
        let spec = BuildProjectSpec {
            name: project_name(image_name, run_token),
            source_bucket: location.bucket.clone(),
            source_key: location.key.clone(),
            artifact_bucket: bucket.clone(),
            compute_type: build.compute_type.clone(),
            build_image: build.build_image.clone(),
            privileged: build.privileged,
            service_role_arn: provisioned.role_arn,
            image_name: image_name.to_string(),
            run_id: self.run_id.to_string(),
        };

        let mut runner = BuildJobRunner::new(
            self.codebuild,
            self.storage,
            self.clock,
            self.reporter,
            self.config,
        );
        if let Some(token) = self.cancel {
            runner = runner.with_cancel(token);
        }

        let mut outcome = runner.run(spec).await?;
        local.merge(std::mem::take(&mut outcome.reclaim));
        outcome.reclaim = local;
        Ok(outcome)
    }

    /// Build and push a Lambda base image with `ctx.libraries` installed.
    ///
    /// Creates the bucket and the ECR repository when missing.
    #[instrument(skip_all, fields(image = %ctx.image))]
    pub async fn build_base_image(
        &self,
        ctx: &BaseImageContext,
    ) -> Result<BuildOutcome, PipelineError> {
        ctx.validate()?;
        let bucket = &self.config.aws.bucket;

        self.storage
            .create_bucket(bucket)
            .await
            .map_err(|source| PipelineError::Preparation {
                step: format!("create bucket {bucket}"),
                source,
            })?;
        info!(bucket = %bucket, "Bucket ready");

        self.registry
            .create_repository(&ctx.image.repository)
            .await
            .map_err(|source| PipelineError::Preparation {
                step: format!("create repository {}", ctx.image.repository),
                source,
            })?;

        self.reporter.report_phase(PipelinePhase::Staging);
        let staging = stage_base_image(ctx)
            .await
            .map_err(|source| PipelineError::Preparation {
                step: "stage build context".to_string(),
                source,
            })?;

        let image_name = base_image_name(&ctx.image.repository, &ctx.image.tag);
        let result = self.build_from_directory(staging.path(), &image_name).await;
        let local = reclaim_local(vec![LocalResource::Directory(staging)], self.reporter);

        let mut outcome = result?;
        outcome.reclaim.merge(local);
        info!(image = %ctx.image, label = %ctx.label(), "Base image built");
        Ok(outcome)
    }
}
