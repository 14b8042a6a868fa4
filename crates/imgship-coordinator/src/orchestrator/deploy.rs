//! Function deployment
//!
//! Snapshots the caller's directory, uploads it as the archive the
//! function loads at runtime, provisions the per-namespace identity, then
//! registers the function against an already-built image and waits until
//! the service reports it.

use super::cleanup::{LocalResource, reclaim_local};
use super::error::PipelineError;
use super::identity::IdentityProvisioner;
use super::policies::ExecutionIdentity;
use super::progress::{PipelinePhase, ProgressReporter};
use super::types::{Deployment, ImageRef, ObjectLocation};
use crate::archive::{Archive, package_directory, snapshot_directory};
use crate::aws::{
    AccountId, DeploymentOperations, FunctionSpec, IdentityOperations, StorageOperations,
};
use crate::config::{ConfigError, ForgeConfig, validate_name};
use crate::wait::{Clock, RetryStop, WaitOutcome, retry_transient, wait_for_resource};
use imgship_common::RunId;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// What to deploy and where
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    /// Directory holding the function code (`main.py` with a `handler`)
    pub source_dir: PathBuf,
    pub function_name: String,
    /// Groups functions that share a role and an archive prefix
    pub namespace: String,
    /// Image the function runs; must already exist in the registry
    pub image: ImageRef,
}

impl DeploymentRequest {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("function name", &self.function_name, &['-', '_'], 64)?;
        // lambda_role_<namespace> must fit IAM's 64 character role names
        validate_name("namespace", &self.namespace, &['-', '_'], 52)?;
        Ok(())
    }

    /// Where the deployment archive is uploaded
    pub fn archive_location(&self, bucket: &str) -> ObjectLocation {
        ObjectLocation {
            bucket: bucket.to_string(),
            key: format!("{}/{}.zip", self.namespace, self.function_name),
        }
    }
}

/// Deploys functions from local directories
pub struct DeploymentProvisioner<'a, I, S, L, C> {
    iam: &'a I,
    storage: &'a S,
    lambda: &'a L,
    clock: &'a C,
    reporter: &'a dyn ProgressReporter,
    config: &'a ForgeConfig,
    account: &'a AccountId,
    run_id: &'a RunId,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, I, S, L, C> DeploymentProvisioner<'a, I, S, L, C>
where
    I: IdentityOperations,
    S: StorageOperations,
    L: DeploymentOperations,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        iam: &'a I,
        storage: &'a S,
        lambda: &'a L,
        clock: &'a C,
        reporter: &'a dyn ProgressReporter,
        config: &'a ForgeConfig,
        account: &'a AccountId,
        run_id: &'a RunId,
    ) -> Self {
        Self {
            iam,
            storage,
            lambda,
            clock,
            reporter,
            config,
            account,
            run_id,
            cancel: None,
        }
    }

    /// Abandon the deployment when `token` fires.
    ///
    /// Checked before every remote mutation, so a fired token never leads
    /// to a new function.
    pub fn with_cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self, during: impl FnOnce() -> String) -> Result<(), PipelineError> {
        if self.cancel.is_some_and(|t| t.is_cancelled()) {
            return Err(PipelineError::Cancelled { during: during() });
        }
        Ok(())
    }

    /// Deploy `request`.
    ///
    /// Local temporary files are removed before returning, whatever the
    /// outcome. The uploaded archive stays: the function reads it at runtime.
    #[instrument(skip_all, fields(function = %request.function_name, namespace = %request.namespace))]
    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<Deployment, PipelineError> {
        request.validate()?;

        self.reporter.report_phase(PipelinePhase::Staging);
        let snapshot = snapshot_directory(&request.source_dir)
            .await
            .map_err(|source| PipelineError::Packaging {
                path: request.source_dir.clone(),
                source,
            })?;

        self.reporter.report_phase(PipelinePhase::Packaging);
        let file_name = format!("{}.zip", request.function_name);
        let archive = match package_directory(snapshot.path(), &file_name).await {
            Ok(archive) => archive,
            Err(source) => {
                reclaim_local(vec![LocalResource::Directory(snapshot)], self.reporter);
                return Err(PipelineError::Packaging {
                    path: request.source_dir.clone(),
                    source,
                });
            }
        };

        let result = self.register(request, &archive).await;

        self.reporter.report_phase(PipelinePhase::Reclaiming);
        let local = reclaim_local(
            vec![
                LocalResource::Archive(archive),
                LocalResource::Directory(snapshot),
            ],
            self.reporter,
        );

        let mut deployment = result?;
        deployment.reclaim.merge(local);
        Ok(deployment)
    }

    async fn register(
        &self,
        request: &DeploymentRequest,
        archive: &Archive,
    ) -> Result<Deployment, PipelineError> {
        let bucket = &self.config.aws.bucket;
        let location = request.archive_location(bucket);

        self.check_cancelled(|| format!("uploading {location}"))?;
        self.reporter.report_phase(PipelinePhase::Uploading);
        self.storage
            .upload_file(&location.bucket, &location.key, archive.path())
            .await
            .map_err(|source| PipelineError::Upload {
                bucket: location.bucket.clone(),
                key: location.key.clone(),
                source,
            })?;

        self.reporter
            .report_phase(PipelinePhase::ProvisioningIdentity);
        let identity = ExecutionIdentity::function(&request.namespace, bucket);
        let provisioned = IdentityProvisioner::new(
            self.iam,
            self.clock,
            self.account,
            self.run_id,
            self.config.retry.settle_delay,
        )
        .provision(&identity)
        .await?;

        let spec = FunctionSpec {
            name: request.function_name.clone(),
            image_uri: request.image.uri(),
            role_arn: provisioned.role_arn,
            memory_mb: self.config.deploy.memory_mb,
            timeout_secs: self.config.deploy.timeout_secs,
            environment: BTreeMap::from([
                ("bucket".to_string(), bucket.clone()),
                ("api_id".to_string(), request.namespace.clone()),
                ("function_name".to_string(), request.function_name.clone()),
            ]),
        };

        self.check_cancelled(|| format!("creating function {}", spec.name))?;
        self.reporter.report_phase(PipelinePhase::CreatingFunction);
        let policy = self.config.retry.policy();
        let mut create_attempts = 0u32;
        let created = retry_transient(
            self.clock,
            &policy,
            self.cancel,
            "function creation",
            |attempt| {
                create_attempts = attempt;
                self.reporter
                    .report_attempt("function creation", attempt, policy.max_attempts);
                self.lambda.create_function(&spec)
            },
        )
        .await;
        let created_arn = created.map_err(|failure| match failure.stop {
            RetryStop::Cancelled => PipelineError::Cancelled {
                during: format!("creating function {}", spec.name),
            },
            RetryStop::Permanent | RetryStop::Exhausted => PipelineError::DeploymentCreation {
                function: spec.name.clone(),
                attempts: failure.attempts,
                source: failure.source,
            },
        })?;

        self.reporter
            .report_phase(PipelinePhase::AwaitingVisibility);
        let lambda = self.lambda;
        let name = spec.name.as_str();
        let outcome = wait_for_resource(
            self.clock,
            &policy,
            self.cancel,
            || lambda.get_function(name),
            name,
        )
        .await
        .map_err(|source| PipelineError::VisibilityCheck {
            function: spec.name.clone(),
            source,
        })?;

        let (visibility_attempts, info) = match outcome {
            WaitOutcome::Ready { attempts, value } => (attempts, value),
            WaitOutcome::Exhausted { attempts } => {
                return Err(PipelineError::VisibilityTimeout {
                    function: spec.name.clone(),
                    attempts,
                });
            }
            WaitOutcome::Cancelled => {
                return Err(PipelineError::Cancelled {
                    during: format!("waiting for function {}", spec.name),
                });
            }
        };

        let function_arn = info.arn.unwrap_or(created_arn);
        info!(
            function = %spec.name,
            arn = %function_arn,
            state = info.state.as_deref().unwrap_or("unknown"),
            image = %spec.image_uri,
            "Function deployed"
        );
        Ok(Deployment {
            function_name: spec.name,
            function_arn,
            function_state: info.state,
            image_uri: spec.image_uri,
            archive: location,
            create_attempts,
            visibility_attempts,
            reclaim: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(function_name: &str, namespace: &str) -> DeploymentRequest {
        DeploymentRequest {
            source_dir: PathBuf::from("/tmp/fn"),
            function_name: function_name.to_string(),
            namespace: namespace.to_string(),
            image: ImageRef {
                account_id: AccountId::parse("123456789012").unwrap(),
                region: "us-east-1".to_string(),
                repository: "models".to_string(),
                tag: "latest".to_string(),
            },
        }
    }

    #[test]
    fn archive_key_is_namespaced() {
        let location = request("predict", "api123").archive_location("imgship-artifacts");
        assert_eq!(location.key, "api123/predict.zip");
        assert_eq!(location.to_string(), "s3://imgship-artifacts/api123/predict.zip");
    }

    #[test]
    fn live_test_namespaces_are_accepted() {
        let namespace = imgship_test_utils::live_namespace();
        assert!(namespace.len() <= imgship_test_utils::MAX_NAMESPACE_LEN);
        assert!(request("predict", &namespace).validate().is_ok());
    }

    #[test]
    fn rejects_unsafe_names() {
        assert!(request("predict", "api123").validate().is_ok());
        assert!(request("pre dict", "api123").validate().is_err());
        assert!(request("predict", "api/123").validate().is_err());
        assert!(request("predict", &"n".repeat(53)).validate().is_err());
    }
}
