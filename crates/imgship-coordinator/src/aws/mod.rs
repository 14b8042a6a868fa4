//! AWS client modules for the coordinator
//!
//! This module provides wrappers around AWS SDK clients for:
//! - IAM: Execution roles and managed policies
//! - CodeBuild: Build projects and builds
//! - S3: Source and deployment archives
//! - Lambda: Deployed functions
//! - ECR: Image repositories
//! - STS: Account ID lookup
//!
//! Each client has a matching `*Operations` trait so orchestration code can
//! run against test doubles.

pub mod account;
pub mod codebuild;
pub mod context;
pub mod ecr;
pub mod error;
pub mod iam;
pub mod lambda;
pub mod s3;
pub mod tags;

// Core clients
pub use account::{AccountId, get_current_account_id};
pub use codebuild::{BuildOperations, BuildProjectSpec, CodeBuildClient};
pub use context::AwsContext;
pub use ecr::{EcrClient, RegistryOperations};
pub use iam::{IamClient, IdentityOperations};
pub use lambda::{DeploymentOperations, FunctionInfo, FunctionSpec, LambdaClient};
pub use s3::{S3Client, StorageOperations};

// Error handling
pub use error::{
    AwsError, classify_anyhow_error, classify_aws_error, classify_sdk_error, ignore_not_found,
    is_transient,
};
