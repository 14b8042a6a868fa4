//! Configuration types for the coordinator
//!
//! The CLI builds a [`ForgeConfig`] from its arguments; nothing below reads
//! the environment. [`ForgeConfig::validate`] runs before any AWS call.

use crate::aws::AccountId;
use crate::wait::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Region must not be empty")]
    EmptyRegion,

    #[error("Invalid bucket name {0:?}: must be 3-63 lowercase letters, digits, '.' or '-'")]
    InvalidBucket(String),

    #[error("Invalid account id {0:?}: expected 12 digits")]
    InvalidAccountId(String),

    #[error("Attempts must be at least 1")]
    ZeroAttempts,

    #[error("Poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("Function memory {0} MB is outside 128-10240")]
    MemoryOutOfRange(i32),

    #[error("Function timeout {0}s is outside 1-900")]
    TimeoutOutOfRange(i32),

    #[error("Invalid {field} {value:?}: {reason}")]
    InvalidName {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// AWS connection configuration
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub aws_profile: Option<String>,
    /// Account id; looked up via STS when absent
    pub account_id: Option<String>,
    /// Bucket for source and deployment archives
    pub bucket: String,
}

/// Remote build parameters
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// CodeBuild image the build runs in
    pub build_image: String,
    /// CodeBuild compute class
    pub compute_type: String,
    /// Privileged mode, required for `docker build`
    pub privileged: bool,
    /// Interval between status polls
    pub poll_interval: Duration,
    /// Give up polling after this long (unbounded when `None`)
    pub deadline: Option<Duration>,
    /// Append the run id to project names
    pub unique_project_names: bool,
}

/// Delays and attempt bounds
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Wait after every identity mutation
    pub settle_delay: Duration,
    /// Attempts for submission, creation and visibility checks
    pub max_attempts: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
    /// Double the delay each attempt instead of keeping it fixed
    pub exponential: bool,
    /// Cap on the delay when `exponential` is set
    pub max_retry_delay: Duration,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        if self.exponential {
            RetryPolicy::exponential(self.max_attempts, self.retry_delay, self.max_retry_delay)
        } else {
            RetryPolicy::fixed(self.max_attempts, self.retry_delay)
        }
    }
}

/// Deployed function parameters
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub memory_mb: i32,
    pub timeout_secs: i32,
}

/// Configuration for one invocation
///
/// Composed of focused sub-configs for organization.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    pub aws: AwsConfig,
    pub build: BuildSettings,
    pub retry: RetrySettings,
    pub deploy: DeploySettings,
}

impl ForgeConfig {
    /// Check every value that AWS would otherwise reject later
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aws.region.trim().is_empty() {
            return Err(ConfigError::EmptyRegion);
        }
        validate_bucket(&self.aws.bucket)?;
        self.configured_account_id()?;

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.build.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if !(128..=10240).contains(&self.deploy.memory_mb) {
            return Err(ConfigError::MemoryOutOfRange(self.deploy.memory_mb));
        }
        if !(1..=900).contains(&self.deploy.timeout_secs) {
            return Err(ConfigError::TimeoutOutOfRange(self.deploy.timeout_secs));
        }
        Ok(())
    }

    /// The configured account id, validated
    pub fn configured_account_id(&self) -> Result<Option<AccountId>, ConfigError> {
        self.aws
            .account_id
            .as_deref()
            .map(|raw| {
                AccountId::parse(raw).ok_or_else(|| ConfigError::InvalidAccountId(raw.to_string()))
            })
            .transpose()
    }
}

fn validate_bucket(bucket: &str) -> Result<(), ConfigError> {
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    let valid_ends = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .is_some_and(|(a, b)| a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric());

    if (3..=63).contains(&bucket.len()) && valid_chars && valid_ends {
        Ok(())
    } else {
        Err(ConfigError::InvalidBucket(bucket.to_string()))
    }
}

/// Check a name that ends up in a resource name or generated file.
///
/// Rejects empty values, characters outside `extra` and ASCII alphanumerics,
/// and anything longer than `max_len`.
pub fn validate_name(
    field: &'static str,
    value: &str,
    extra: &[char],
    max_len: usize,
) -> Result<(), ConfigError> {
    let reason = if value.is_empty() {
        Some("cannot be empty")
    } else if value.len() > max_len {
        Some("too long")
    } else if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || extra.contains(&c))
    {
        Some("contains a forbidden character")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
