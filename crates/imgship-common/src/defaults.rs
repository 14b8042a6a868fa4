//! Default configuration values
//!
//! Delays are expressed in whole seconds so they can be used directly as
//! CLI defaults.

/// Wait after every identity mutation so IAM changes propagate
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 10;

/// Attempts for build submission and function creation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between submission/creation/visibility attempts
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

/// Upper bound on the delay when exponential backoff is enabled
pub const DEFAULT_MAX_RETRY_DELAY_SECS: u64 = 60;

/// Interval between build status polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// CodeBuild image used to run `docker build`
pub const DEFAULT_BUILD_IMAGE: &str = "aws/codebuild/standard:5.0";

/// CodeBuild compute class
pub const DEFAULT_COMPUTE_TYPE: &str = "BUILD_GENERAL1_SMALL";

/// Memory for deployed functions, in MB
pub const DEFAULT_MEMORY_MB: i32 = 1024;

/// Timeout for deployed functions, in seconds
pub const DEFAULT_FUNCTION_TIMEOUT_SECS: i32 = 90;

/// Python runtime of the Lambda base image
pub const DEFAULT_RUNTIME_VERSION: &str = "3.8";

/// Name of the role CodeBuild assumes
pub const CODEBUILD_ROLE_NAME: &str = "codebuild_role";

/// Name of the managed policy attached to the CodeBuild role
pub const CODEBUILD_POLICY_NAME: &str = "codebuild_policy";

/// Prefix of the per-namespace role deployed functions assume
pub const FUNCTION_ROLE_PREFIX: &str = "lambda_role_";

/// Prefix of the per-namespace policy attached to the function role
pub const FUNCTION_POLICY_PREFIX: &str = "lambda_policy_";

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-1";
