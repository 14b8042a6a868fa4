//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format. Clients convert SDK errors at
//! the call site with [`classify_sdk_error`] so orchestration code can
//! recover the category from an `anyhow::Error` with [`classify_anyhow_error`].

use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata};
use thiserror::Error;

/// AWS error categories for retry and cleanup logic
#[derive(Debug, Clone, Error)]
pub enum AwsError {
    /// Resource was not found (safe to skip in cleanup)
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Resource already exists
    #[error("Resource already exists")]
    AlreadyExists,

    /// A freshly created role is not yet assumable by the calling service
    #[error("IAM role not yet assumable (eventual consistency)")]
    IamPropagationDelay,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource has dependent objects (retryable, e.g. a policy still attached)
    #[error("Resource has dependent objects")]
    DependencyViolation,

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AwsError::IamPropagationDelay | AwsError::Throttled | AwsError::DependencyViolation
        )
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            AwsError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            AwsError::Throttled => suggestion_for_code("ThrottlingException"),
            _ => None,
        }
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchEntity",
    "NoSuchBucket",
    "NoSuchKey",
    "NotFound",
    "ResourceNotFoundException",
    "RepositoryNotFoundException",
    "ImageNotFoundException",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "ResourceAlreadyExistsException",
    "ResourceConflictException",
    "RepositoryAlreadyExistsException",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "AccountLimitExceededException",
];

/// Known AWS error codes for dependency violations (resource still in use)
const DEPENDENCY_CODES: &[&str] = &["DeleteConflict", "DependencyViolation"];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: "resource",
            resource_id: message.clone(),
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation,
        // CodeBuild: "CodeBuild is not authorized to perform: sts:AssumeRole on ..."
        Some("InvalidInputException") if message.contains("sts:AssumeRole") => {
            AwsError::IamPropagationDelay
        }
        // Lambda: "The role defined for the function cannot be assumed by Lambda."
        Some("InvalidParameterValueException") if message.contains("cannot be assumed") => {
            AwsError::IamPropagationDelay
        }
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an SDK operation error at the call site.
///
/// Works for any `SdkError<E, R>` whose operation error exposes metadata.
/// When the service supplied no message (e.g. a dispatch failure) the full
/// error context is used instead.
pub fn classify_sdk_error<E>(err: &E) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let message = err
        .message()
        .map(|m| m.to_string())
        .unwrap_or_else(|| DisplayErrorContext(err).to_string());
    classify_aws_error(err.code(), Some(&message))
}

/// Classify an error from an anyhow::Error.
///
/// Walks the error chain looking for an `AwsError` produced by
/// [`classify_sdk_error`]. Falls back to string matching on the Debug
/// representation if no typed error is found.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    for cause in error.chain() {
        if let Some(aws) = cause.downcast_ref::<AwsError>() {
            return aws.clone();
        }
    }

    // Fallback: extract error code from debug string representation
    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Whether the error chain carries a retryable AWS error
pub fn is_transient(error: &anyhow::Error) -> bool {
    classify_anyhow_error(error).is_retryable()
}

/// Turn a "not found" error into `Ok(None)`, passing everything else through.
///
/// Used by `get_*` style calls where absence is an expected answer.
pub fn ignore_not_found<T>(result: anyhow::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if classify_anyhow_error(&e).is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// All known AWS error codes for extraction from debug strings (flat list)
const ALL_KNOWN_CODES: &[&str] = &[
    // Not found
    "NoSuchEntity",
    "NoSuchBucket",
    "NoSuchKey",
    "ResourceNotFoundException",
    "RepositoryNotFoundException",
    "ImageNotFoundException",
    // Already exists
    "EntityAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "ResourceAlreadyExistsException",
    "ResourceConflictException",
    "RepositoryAlreadyExistsException",
    // Throttling
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "Throttling",
    // Dependency
    "DeleteConflict",
    "DependencyViolation",
    // Access
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
];

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in ALL_KNOWN_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Check for role propagation patterns
    if debug_str.contains("InvalidInputException") && debug_str.contains("sts:AssumeRole") {
        return Some("InvalidInputException".to_string());
    }
    if debug_str.contains("cannot be assumed") {
        return Some("InvalidParameterValueException".to_string());
    }

    // Try to extract any code from `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "AccessDenied",
        "Check that the configured profile may manage IAM, CodeBuild, S3, ECR and Lambda.",
    ),
    (
        "AccessDeniedException",
        "Check that the configured profile may manage IAM, CodeBuild, S3, ECR and Lambda.",
    ),
    (
        "ExpiredToken",
        "Credentials have expired. Refresh them (e.g. `aws sso login`) and retry.",
    ),
    (
        "ThrottlingException",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
    (
        "TooManyRequestsException",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
    (
        "AccountLimitExceededException",
        "The CodeBuild concurrent build quota is exhausted. Wait for running builds to finish.",
    ),
    (
        "RepositoryNotFoundException",
        "Build the base image first with `imgship build-base-image`.",
    ),
    (
        "ImageNotFoundException",
        "Build the base image first with `imgship build-base-image`.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
