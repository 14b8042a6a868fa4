//! Lambda function registration and lookup

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use anyhow::{Context, Result};
use aws_sdk_lambda::Client;
use aws_sdk_lambda::types::{Environment, FunctionCode, PackageType};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Parameters of a container-image function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    /// `<account>.dkr.ecr.<region>.amazonaws.com/<repo>:<tag>`
    pub image_uri: String,
    pub role_arn: String,
    pub memory_mb: i32,
    pub timeout_secs: i32,
    pub environment: BTreeMap<String, String>,
}

/// What `get_function` reports about a registered function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub arn: Option<String>,
    /// Lambda's lifecycle state (`Pending`, `Active`, ...) when reported
    pub state: Option<String>,
}

/// Lambda client for deployed functions
pub struct LambdaClient {
    client: Client,
}

impl LambdaClient {
    /// Create a Lambda client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.lambda_client(),
        }
    }

    /// Register a function backed by a container image, returning its ARN
    pub async fn create_function(&self, spec: &FunctionSpec) -> Result<String> {
        info!(function = %spec.name, image = %spec.image_uri, "Creating function");

        let environment = Environment::builder()
            .set_variables(Some(spec.environment.clone().into_iter().collect()))
            .build();

        let out = self
            .client
            .create_function()
            .function_name(&spec.name)
            .role(&spec.role_arn)
            .code(FunctionCode::builder().image_uri(&spec.image_uri).build())
            .package_type(PackageType::Image)
            .memory_size(spec.memory_mb)
            .timeout(spec.timeout_secs)
            .environment(environment)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to create function {}", spec.name))?;

        let arn = out.function_arn().unwrap_or_default().to_string();
        debug!(function = %spec.name, arn = %arn, "Function created");
        Ok(arn)
    }

    /// Describe a function, returning `None` if it does not exist
    pub async fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>> {
        let result = self
            .client
            .get_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to describe function {name}"));

        Ok(ignore_not_found(result)?.map(|out| {
            let config = out.configuration();
            FunctionInfo {
                arn: config.and_then(|c| c.function_arn()).map(str::to_string),
                state: config
                    .and_then(|c| c.state())
                    .map(|s| s.as_str().to_string()),
            }
        }))
    }
}

/// Trait for Lambda operations that can be mocked in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait DeploymentOperations: Send + Sync {
    /// Register a function, returning its ARN
    async fn create_function(&self, spec: &FunctionSpec) -> Result<String>;

    /// Describe a function by name
    async fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>>;
}

impl DeploymentOperations for LambdaClient {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<String> {
        LambdaClient::create_function(self, spec).await
    }

    async fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>> {
        LambdaClient::get_function(self, name).await
    }
}
