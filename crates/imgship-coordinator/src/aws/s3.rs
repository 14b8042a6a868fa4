//! S3 bucket and object management

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use anyhow::{Context, Result};
use aws_sdk_s3::{Client, primitives::ByteStream};
use std::path::Path;
use tracing::{debug, info};

/// S3 client for source and deployment archives
pub struct S3Client {
    client: Client,
    region: String,
}

impl S3Client {
    /// Create an S3 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
            region: ctx.region().to_string(),
        }
    }

    /// Create a bucket, succeeding if this account already owns it
    pub async fn create_bucket(&self, bucket_name: &str) -> Result<()> {
        info!(bucket = %bucket_name, region = %self.region, "Ensuring S3 bucket");

        let mut request = self.client.create_bucket().bucket(bucket_name);

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            let location_constraint =
                aws_sdk_s3::types::BucketLocationConstraint::from(self.region.as_str());
            request = request.create_bucket_configuration(
                aws_sdk_s3::types::CreateBucketConfiguration::builder()
                    .location_constraint(location_constraint)
                    .build(),
            );
        }

        match request.send().await.map_err(|e| classify_sdk_error(&e)) {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(bucket = %bucket_name, "Bucket already owned by this account");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create bucket {bucket_name}")),
        }
    }

    /// Upload a file to S3
    pub async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        debug!(bucket = %bucket, key = %key, path = %path.display(), "Uploading file");

        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type("application/zip")
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to upload s3://{bucket}/{key}"))?;

        Ok(())
    }

    /// Delete a single object ("not found" is success)
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let result = self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to delete s3://{bucket}/{key}"));

        ignore_not_found(result)?;
        debug!(bucket = %bucket, key = %key, "Object deleted");
        Ok(())
    }
}

/// Trait for object storage operations that can be mocked in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait StorageOperations: Send + Sync {
    /// Upload a local file to `bucket/key`
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()>;

    /// Delete `bucket/key`
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Create a bucket if this account does not already own it
    async fn create_bucket(&self, bucket: &str) -> Result<()>;
}

impl StorageOperations for S3Client {
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        S3Client::upload_file(self, bucket, key, path).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        S3Client::delete_object(self, bucket, key).await
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        S3Client::create_bucket(self, bucket).await
    }
}
