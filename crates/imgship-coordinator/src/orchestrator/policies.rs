//! Execution identities for the build and the deployed function

use imgship_common::defaults::{
    CODEBUILD_POLICY_NAME, CODEBUILD_ROLE_NAME, FUNCTION_POLICY_PREFIX, FUNCTION_ROLE_PREFIX,
};

/// Trust policy allowing CodeBuild to assume the role
const CODEBUILD_TRUST_POLICY: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [
        {
            "Effect": "Allow",
            "Principal": {
                "Service": "codebuild.amazonaws.com"
            },
            "Action": "sts:AssumeRole"
        }
    ]
}"#;

/// Trust policy allowing Lambda to assume the role
const LAMBDA_TRUST_POLICY: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [
        {
            "Effect": "Allow",
            "Principal": {
                "Service": "lambda.amazonaws.com"
            },
            "Action": "sts:AssumeRole"
        }
    ]
}"#;

/// Generate the policy for the CodeBuild service role
///
/// The build needs:
/// - CloudWatch Logs for build output
/// - S3 read access to fetch the source archive, write access for artifacts
/// - ECR push access for the built image
fn codebuild_policy(bucket_name: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "BuildLogs",
                "Effect": "Allow",
                "Action": [
                    "logs:CreateLogGroup",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents"
                ],
                "Resource": "*"
            },
            {
                "Sid": "SourceAndArtifacts",
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:GetObjectVersion", "s3:PutObject"],
                "Resource": format!("arn:aws:s3:::{}/*", bucket_name)
            },
            {
                "Sid": "ImagePush",
                "Effect": "Allow",
                "Action": [
                    "ecr:GetAuthorizationToken",
                    "ecr:BatchCheckLayerAvailability",
                    "ecr:GetDownloadUrlForLayer",
                    "ecr:BatchGetImage",
                    "ecr:InitiateLayerUpload",
                    "ecr:UploadLayerPart",
                    "ecr:CompleteLayerUpload",
                    "ecr:PutImage"
                ],
                "Resource": "*"
            }
        ]
    })
    .to_string()
}

/// Generate the policy for a deployed function's role
///
/// The function reads its deployment archive from `<bucket>/<namespace>/`.
fn function_policy(namespace: &str, bucket_name: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "FunctionLogs",
                "Effect": "Allow",
                "Action": [
                    "logs:CreateLogGroup",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents"
                ],
                "Resource": "*"
            },
            {
                "Sid": "DeploymentArchive",
                "Effect": "Allow",
                "Action": ["s3:GetObject"],
                "Resource": format!("arn:aws:s3:::{}/{}/*", bucket_name, namespace)
            }
        ]
    })
    .to_string()
}

/// A role and the policy attached to it
///
/// Recreated on every invocation rather than diffed, so its content is
/// always what the current invocation requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionIdentity {
    pub role_name: String,
    pub trust_policy: String,
    pub policy_name: String,
    pub policy_document: String,
}

impl ExecutionIdentity {
    /// Role assumed by CodeBuild while building an image
    pub fn codebuild(bucket_name: &str) -> Self {
        Self {
            role_name: CODEBUILD_ROLE_NAME.to_string(),
            trust_policy: CODEBUILD_TRUST_POLICY.to_string(),
            policy_name: CODEBUILD_POLICY_NAME.to_string(),
            policy_document: codebuild_policy(bucket_name),
        }
    }

    /// Per-namespace role assumed by deployed functions
    pub fn function(namespace: &str, bucket_name: &str) -> Self {
        Self {
            role_name: format!("{FUNCTION_ROLE_PREFIX}{namespace}"),
            trust_policy: LAMBDA_TRUST_POLICY.to_string(),
            policy_name: format!("{FUNCTION_POLICY_PREFIX}{namespace}"),
            policy_document: function_policy(namespace, bucket_name),
        }
    }
}
