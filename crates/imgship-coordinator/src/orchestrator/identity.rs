//! Execution identity provisioning
//!
//! Roles and policies are replaced rather than updated: an existing role is
//! stripped of its attached policies and deleted, then recreated from the
//! current trust policy. IAM is eventually consistent, so every mutation is
//! followed by a settle delay before the next dependent call.

use super::error::{IdentityStage, PipelineError};
use super::policies::ExecutionIdentity;
use super::types::ProvisionedIdentity;
use crate::aws::{AccountId, IdentityOperations};
use crate::wait::Clock;
use imgship_common::RunId;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// ARN of a customer-managed policy in `account`
pub fn policy_arn(account: &AccountId, policy_name: &str) -> String {
    format!("arn:aws:iam::{account}:policy/{policy_name}")
}

/// Creates and replaces execution roles and policies
pub struct IdentityProvisioner<'a, I, C> {
    iam: &'a I,
    clock: &'a C,
    account: &'a AccountId,
    run_id: &'a RunId,
    settle_delay: Duration,
}

impl<'a, I, C> IdentityProvisioner<'a, I, C>
where
    I: IdentityOperations,
    C: Clock,
{
    pub fn new(
        iam: &'a I,
        clock: &'a C,
        account: &'a AccountId,
        run_id: &'a RunId,
        settle_delay: Duration,
    ) -> Self {
        Self {
            iam,
            clock,
            account,
            run_id,
            settle_delay,
        }
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            debug!(delay_secs = self.settle_delay.as_secs(), "Waiting for IAM to settle");
            self.clock.sleep(self.settle_delay).await;
        }
    }

    /// Replace the role `name` with a fresh one bound to `trust_policy`.
    ///
    /// Returns the new role's ARN.
    pub async fn ensure_role(&self, name: &str, trust_policy: &str) -> Result<String, PipelineError> {
        let fail = |stage: IdentityStage| {
            move |source: anyhow::Error| PipelineError::IdentityProvisioning {
                stage,
                name: name.to_string(),
                source,
            }
        };

        let existing = self
            .iam
            .get_role(name)
            .await
            .map_err(fail(IdentityStage::LookupRole))?;

        if existing.is_some() {
            info!(role_name = %name, "Replacing existing IAM role");
            let attached = self
                .iam
                .list_attached_role_policies(name)
                .await
                .map_err(fail(IdentityStage::RemoveRole))?;
            for arn in &attached {
                self.iam
                    .detach_role_policy(name, arn)
                    .await
                    .map_err(fail(IdentityStage::RemoveRole))?;
            }
            self.iam
                .delete_role(name)
                .await
                .map_err(fail(IdentityStage::RemoveRole))?;
            self.settle().await;
        }

        let arn = self
            .iam
            .create_role(name, trust_policy, self.run_id.as_str())
            .await
            .map_err(fail(IdentityStage::CreateRole))?;
        self.settle().await;

        Ok(arn)
    }

    /// Replace the managed policy `name` with one holding `document`.
    ///
    /// Returns the policy ARN.
    pub async fn ensure_policy(&self, name: &str, document: &str) -> Result<String, PipelineError> {
        let fail = |stage: IdentityStage| {
            move |source: anyhow::Error| PipelineError::IdentityProvisioning {
                stage,
                name: name.to_string(),
                source,
            }
        };
        let arn = policy_arn(self.account, name);

        let existing = self
            .iam
            .get_policy(&arn)
            .await
            .map_err(fail(IdentityStage::LookupPolicy))?;

        if existing.is_some() {
            info!(policy_arn = %arn, "Replacing existing IAM policy");
            self.iam
                .delete_policy(&arn)
                .await
                .map_err(fail(IdentityStage::RemovePolicy))?;
            self.settle().await;
        }

        let created = self
            .iam
            .create_policy(name, document, self.run_id.as_str())
            .await
            .map_err(fail(IdentityStage::CreatePolicy))?;
        self.settle().await;

        if created != arn {
            debug!(expected = %arn, created = %created, "Policy ARN differs from derived ARN");
        }
        Ok(created)
    }

    /// Attach the policy at `policy_arn` to `role`.
    pub async fn attach(&self, role: &str, policy_arn: &str) -> Result<(), PipelineError> {
        self.iam
            .attach_role_policy(role, policy_arn)
            .await
            .map_err(|source| PipelineError::IdentityProvisioning {
                stage: IdentityStage::AttachPolicy,
                name: role.to_string(),
                source,
            })?;
        self.settle().await;
        Ok(())
    }

    /// Ensure the role, then the policy, then attach them.
    #[instrument(skip_all, fields(role = %identity.role_name))]
    pub async fn provision(
        &self,
        identity: &ExecutionIdentity,
    ) -> Result<ProvisionedIdentity, PipelineError> {
        let role_arn = self
            .ensure_role(&identity.role_name, &identity.trust_policy)
            .await?;
        let policy_arn = self
            .ensure_policy(&identity.policy_name, &identity.policy_document)
            .await?;
        self.attach(&identity.role_name, &policy_arn).await?;

        info!(role_arn = %role_arn, policy_arn = %policy_arn, "Execution identity ready");
        Ok(ProvisionedIdentity {
            role_name: identity.role_name.clone(),
            role_arn,
            policy_arn,
        })
    }
}
