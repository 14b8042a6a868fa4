//! ECR repository and image checks

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use anyhow::{Context, Result};
use aws_sdk_ecr::Client;
use aws_sdk_ecr::types::ImageIdentifier;
use tracing::{debug, info};

/// ECR client for the image repositories builds push to
pub struct EcrClient {
    client: Client,
}

impl EcrClient {
    /// Create an ECR client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecr_client(),
        }
    }

    /// Create a repository, succeeding if it already exists
    pub async fn create_repository(&self, repository: &str) -> Result<()> {
        match self
            .client
            .create_repository()
            .repository_name(repository)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
        {
            Ok(_) => {
                info!(repository = %repository, "Repository created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(repository = %repository, "Repository already exists");
                Ok(())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to create repository {repository}"))
            }
        }
    }

    /// Whether `repository:tag` has been pushed
    pub async fn image_exists(&self, repository: &str, tag: &str) -> Result<bool> {
        let result = self
            .client
            .describe_images()
            .repository_name(repository)
            .image_ids(ImageIdentifier::builder().image_tag(tag).build())
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to describe image {repository}:{tag}"));

        Ok(ignore_not_found(result)?.is_some_and(|out| !out.image_details().is_empty()))
    }
}

/// Trait for registry operations that can be mocked in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait RegistryOperations: Send + Sync {
    async fn create_repository(&self, repository: &str) -> Result<()>;

    async fn image_exists(&self, repository: &str, tag: &str) -> Result<bool>;
}

impl RegistryOperations for EcrClient {
    async fn create_repository(&self, repository: &str) -> Result<()> {
        EcrClient::create_repository(self, repository).await
    }

    async fn image_exists(&self, repository: &str, tag: &str) -> Result<bool> {
        EcrClient::image_exists(self, repository, tag).await
    }
}
