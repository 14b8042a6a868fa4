//! IAM role and managed policy management for build and function identities

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use crate::aws::tags::iam_tags;
use anyhow::{Context, Result};
use aws_sdk_iam::Client;
use tracing::{debug, info};

/// IAM client for managing roles and managed policies
pub struct IamClient {
    client: Client,
}

impl IamClient {
    /// Create an IAM client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.iam_client(),
        }
    }

    /// Look up a role, returning its ARN or `None` if it does not exist
    pub async fn get_role(&self, role_name: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to get IAM role {role_name}"));

        Ok(ignore_not_found(result)?.and_then(|out| out.role().map(|r| r.arn().to_string())))
    }

    /// Create a role bound to `trust_policy`, returning its ARN
    pub async fn create_role(
        &self,
        role_name: &str,
        trust_policy: &str,
        run_id: &str,
    ) -> Result<String> {
        info!(role_name = %role_name, "Creating IAM role");

        let out = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .description(format!("imgship execution role for run {run_id}"))
            .set_tags(Some(iam_tags(run_id)?))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to create IAM role {role_name}"))?;

        let arn = out
            .role()
            .map(|r| r.arn().to_string())
            .context("CreateRole returned no role")?;

        debug!(role_name = %role_name, arn = %arn, "IAM role created");
        Ok(arn)
    }

    /// List the ARNs of managed policies attached to a role
    pub async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_attached_role_policies()
                .role_name(role_name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e))
                .with_context(|| format!("Failed to list policies attached to {role_name}"))?;

            arns.extend(
                resp.attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(str::to_string)),
            );

            if resp.is_truncated() {
                marker = resp.marker().map(str::to_string);
            }
            if marker.is_none() {
                break;
            }
        }

        Ok(arns)
    }

    /// Detach a managed policy from a role ("not found" is success)
    pub async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        let result = self
            .client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to detach {policy_arn} from {role_name}"));

        ignore_not_found(result)?;
        debug!(role_name = %role_name, policy_arn = %policy_arn, "Policy detached");
        Ok(())
    }

    /// Delete a role ("not found" is success).
    ///
    /// Inline policies are removed first; managed policies must already be
    /// detached.
    pub async fn delete_role(&self, role_name: &str) -> Result<()> {
        let inline = self
            .client
            .list_role_policies()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to list inline policies of {role_name}"));

        if let Some(inline) = ignore_not_found(inline)? {
            for policy_name in inline.policy_names() {
                self.client
                    .delete_role_policy()
                    .role_name(role_name)
                    .policy_name(policy_name)
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))
                    .with_context(|| {
                        format!("Failed to delete inline policy {policy_name} of {role_name}")
                    })?;
            }
        }

        let result = self
            .client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to delete IAM role {role_name}"));

        if ignore_not_found(result)?.is_some() {
            info!(role_name = %role_name, "IAM role deleted");
        }
        Ok(())
    }

    /// Look up a managed policy by ARN, returning the ARN or `None`
    pub async fn get_policy(&self, policy_arn: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to get IAM policy {policy_arn}"));

        Ok(ignore_not_found(result)?
            .and_then(|out| out.policy().and_then(|p| p.arn()).map(str::to_string)))
    }

    /// Create a managed policy, returning its ARN
    pub async fn create_policy(
        &self,
        policy_name: &str,
        document: &str,
        run_id: &str,
    ) -> Result<String> {
        info!(policy_name = %policy_name, "Creating IAM policy");

        let out = self
            .client
            .create_policy()
            .policy_name(policy_name)
            .policy_document(document)
            .description(format!("imgship execution policy for run {run_id}"))
            .set_tags(Some(iam_tags(run_id)?))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to create IAM policy {policy_name}"))?;

        let arn = out
            .policy()
            .and_then(|p| p.arn())
            .map(str::to_string)
            .context("CreatePolicy returned no policy ARN")?;

        debug!(policy_name = %policy_name, arn = %arn, "IAM policy created");
        Ok(arn)
    }

    /// Delete a managed policy ("not found" is success).
    ///
    /// Detaches it from every role and removes non-default versions first,
    /// since IAM refuses to delete a policy that still has either.
    pub async fn delete_policy(&self, policy_arn: &str) -> Result<()> {
        let entities = self
            .client
            .list_entities_for_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to list entities for {policy_arn}"));

        let Some(entities) = ignore_not_found(entities)? else {
            return Ok(());
        };

        for role in entities.policy_roles() {
            if let Some(role_name) = role.role_name() {
                self.detach_role_policy(role_name, policy_arn).await?;
            }
        }

        let versions = self
            .client
            .list_policy_versions()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to list versions of {policy_arn}"))?;

        for version in versions.versions() {
            if version.is_default_version() {
                continue;
            }
            if let Some(version_id) = version.version_id() {
                self.client
                    .delete_policy_version()
                    .policy_arn(policy_arn)
                    .version_id(version_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e))
                    .with_context(|| {
                        format!("Failed to delete version {version_id} of {policy_arn}")
                    })?;
            }
        }

        let result = self
            .client
            .delete_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to delete IAM policy {policy_arn}"));

        if ignore_not_found(result)?.is_some() {
            info!(policy_arn = %policy_arn, "IAM policy deleted");
        }
        Ok(())
    }

    /// Attach a managed policy to a role
    pub async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e))
            .with_context(|| format!("Failed to attach {policy_arn} to {role_name}"))?;

        info!(role_name = %role_name, policy_arn = %policy_arn, "Policy attached");
        Ok(())
    }
}

/// Trait for IAM operations that can be mocked in tests.
///
/// `get_*` return `None` and `delete_*`/`detach_*` succeed when the
/// resource does not exist.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait IdentityOperations: Send + Sync {
    /// Look up a role's ARN
    async fn get_role(&self, role_name: &str) -> Result<Option<String>>;

    /// Create a role bound to a trust policy
    async fn create_role(&self, role_name: &str, trust_policy: &str, run_id: &str)
    -> Result<String>;

    /// Delete a role
    async fn delete_role(&self, role_name: &str) -> Result<()>;

    /// List managed policy ARNs attached to a role
    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>>;

    /// Detach a managed policy from a role
    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;

    /// Look up a managed policy by ARN
    async fn get_policy(&self, policy_arn: &str) -> Result<Option<String>>;

    /// Create a managed policy
    async fn create_policy(&self, policy_name: &str, document: &str, run_id: &str)
    -> Result<String>;

    /// Delete a managed policy
    async fn delete_policy(&self, policy_arn: &str) -> Result<()>;

    /// Attach a managed policy to a role
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;
}

impl IdentityOperations for IamClient {
    async fn get_role(&self, role_name: &str) -> Result<Option<String>> {
        IamClient::get_role(self, role_name).await
    }

    async fn create_role(
        &self,
        role_name: &str,
        trust_policy: &str,
        run_id: &str,
    ) -> Result<String> {
        IamClient::create_role(self, role_name, trust_policy, run_id).await
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        IamClient::delete_role(self, role_name).await
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>> {
        IamClient::list_attached_role_policies(self, role_name).await
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        IamClient::detach_role_policy(self, role_name, policy_arn).await
    }

    async fn get_policy(&self, policy_arn: &str) -> Result<Option<String>> {
        IamClient::get_policy(self, policy_arn).await
    }

    async fn create_policy(
        &self,
        policy_name: &str,
        document: &str,
        run_id: &str,
    ) -> Result<String> {
        IamClient::create_policy(self, policy_name, document, run_id).await
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<()> {
        IamClient::delete_policy(self, policy_arn).await
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        IamClient::attach_role_policy(self, role_name, policy_arn).await
    }
}
