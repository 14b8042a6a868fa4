//! Shared test utilities for scenario tests
//!
//! In-memory fakes of the AWS collaborators that keep just enough state to
//! behave like the real services (a role with attached policies cannot be
//! deleted, a project must exist before a build starts, ...) and record
//! every call so tests can assert on what was created and reclaimed.

#![allow(dead_code)]

use anyhow::Result;
use imgship_common::BuildStatus;
use imgship_common::defaults::*;
use imgship_coordinator::aws::{
    AccountId, AwsError, BuildOperations, BuildProjectSpec, DeploymentOperations, FunctionInfo,
    FunctionSpec, IdentityOperations, RegistryOperations, StorageOperations,
};
use imgship_coordinator::config::{
    AwsConfig, BuildSettings, DeploySettings, ForgeConfig, RetrySettings,
};
use imgship_coordinator::orchestrator::ProgressEvent;
use imgship_coordinator::wait::Clock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const TEST_ACCOUNT: &str = "123456789012";
pub const TEST_BUCKET: &str = "imgship-artifacts";

pub fn account() -> AccountId {
    AccountId::parse(TEST_ACCOUNT).unwrap()
}

/// Configuration with the CLI defaults
pub fn test_config() -> ForgeConfig {
    ForgeConfig {
        aws: AwsConfig {
            region: DEFAULT_REGION.to_string(),
            aws_profile: None,
            account_id: Some(TEST_ACCOUNT.to_string()),
            bucket: TEST_BUCKET.to_string(),
        },
        build: BuildSettings {
            build_image: DEFAULT_BUILD_IMAGE.to_string(),
            compute_type: DEFAULT_COMPUTE_TYPE.to_string(),
            privileged: true,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            deadline: None,
            unique_project_names: false,
        },
        retry: RetrySettings {
            settle_delay: Duration::from_secs(DEFAULT_SETTLE_DELAY_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            exponential: false,
            max_retry_delay: Duration::from_secs(DEFAULT_MAX_RETRY_DELAY_SECS),
        },
        deploy: DeploySettings {
            memory_mb: DEFAULT_MEMORY_MB,
            timeout_secs: DEFAULT_FUNCTION_TIMEOUT_SECS,
        },
    }
}

fn not_found(resource_type: &'static str, id: &str) -> anyhow::Error {
    anyhow::Error::new(AwsError::NotFound {
        resource_type,
        resource_id: id.to_string(),
    })
}

/// A non-transient service error
pub fn access_denied() -> AwsError {
    AwsError::Sdk {
        code: Some("AccessDeniedException".to_string()),
        message: "not authorized".to_string(),
    }
}

/// Names of the file entries in a zip archive, in archive order
pub fn zip_file_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .filter(|name| !name.ends_with('/'))
        .collect()
}

/// Drain every event already sent to a `ChannelReporter`
pub fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Virtual time: `sleep` returns immediately and advances `now`
pub struct RecordingClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    /// How many sleeps of exactly `duration` were requested
    pub fn count(&self, duration: Duration) -> usize {
        self.sleeps().iter().filter(|d| **d == duration).count()
    }

    pub fn total(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }
}

impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        *self.elapsed.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
        std::future::ready(())
    }
}

// ---------------------------------------------------------------------------
// IAM
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct IamState {
    /// role name -> trust policy
    pub roles: BTreeMap<String, String>,
    /// policy ARN -> document
    pub policies: BTreeMap<String, String>,
    /// role name -> attached policy ARNs
    pub attachments: BTreeMap<String, Vec<String>>,
    pub calls: Vec<String>,
    /// Returned by the next `create_role`
    pub create_role_failure: Option<AwsError>,
}

#[derive(Default)]
pub struct FakeIam {
    pub state: Mutex<IamState>,
}

impl FakeIam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role_arn(name: &str) -> String {
        format!("arn:aws:iam::{TEST_ACCOUNT}:role/{name}")
    }

    pub fn policy_arn(name: &str) -> String {
        format!("arn:aws:iam::{TEST_ACCOUNT}:policy/{name}")
    }

    /// Seed an existing role with `attached` policies already attached
    pub fn with_role(self, name: &str, trust: &str, attached: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.roles.insert(name.to_string(), trust.to_string());
            state.attachments.insert(
                name.to_string(),
                attached.iter().map(|a| a.to_string()).collect(),
            );
        }
        self
    }

    /// Seed an existing policy
    pub fn with_policy(self, name: &str, document: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .policies
            .insert(Self::policy_arn(name), document.to_string());
        self
    }

    pub fn fail_create_role(&self, error: AwsError) {
        self.state.lock().unwrap().create_role_failure = Some(error);
    }

    pub fn trust_policy(&self, role: &str) -> Option<String> {
        self.state.lock().unwrap().roles.get(role).cloned()
    }

    pub fn policy_document(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .policies
            .get(&Self::policy_arn(name))
            .cloned()
    }

    pub fn attached(&self, role: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(role)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, IamState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

impl IdentityOperations for FakeIam {
    async fn get_role(&self, role_name: &str) -> Result<Option<String>> {
        let state = self.record(format!("get_role {role_name}"));
        Ok(state.roles.get(role_name).map(|_| Self::role_arn(role_name)))
    }

    async fn create_role(
        &self,
        role_name: &str,
        trust_policy: &str,
        _run_id: &str,
    ) -> Result<String> {
        let mut state = self.record(format!("create_role {role_name}"));
        if let Some(error) = state.create_role_failure.take() {
            return Err(anyhow::Error::new(error));
        }
        if state.roles.contains_key(role_name) {
            return Err(anyhow::Error::new(AwsError::AlreadyExists));
        }
        state
            .roles
            .insert(role_name.to_string(), trust_policy.to_string());
        Ok(Self::role_arn(role_name))
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        let mut state = self.record(format!("delete_role {role_name}"));
        if state
            .attachments
            .get(role_name)
            .is_some_and(|a| !a.is_empty())
        {
            return Err(anyhow::Error::new(AwsError::DependencyViolation));
        }
        state.attachments.remove(role_name);
        state.roles.remove(role_name);
        Ok(())
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>> {
        let state = self.record(format!("list_attached_role_policies {role_name}"));
        Ok(state.attachments.get(role_name).cloned().unwrap_or_default())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.record(format!("detach_role_policy {role_name} {policy_arn}"));
        if let Some(attached) = state.attachments.get_mut(role_name) {
            attached.retain(|a| a != policy_arn);
        }
        Ok(())
    }

    async fn get_policy(&self, policy_arn: &str) -> Result<Option<String>> {
        let state = self.record(format!("get_policy {policy_arn}"));
        Ok(state
            .policies
            .get(policy_arn)
            .map(|_| policy_arn.to_string()))
    }

    async fn create_policy(
        &self,
        policy_name: &str,
        document: &str,
        _run_id: &str,
    ) -> Result<String> {
        let mut state = self.record(format!("create_policy {policy_name}"));
        let arn = Self::policy_arn(policy_name);
        if state.policies.contains_key(&arn) {
            return Err(anyhow::Error::new(AwsError::AlreadyExists));
        }
        state.policies.insert(arn.clone(), document.to_string());
        Ok(arn)
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<()> {
        let mut state = self.record(format!("delete_policy {policy_arn}"));
        for attached in state.attachments.values_mut() {
            attached.retain(|a| a != policy_arn);
        }
        state.policies.remove(policy_arn);
        Ok(())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.record(format!("attach_role_policy {role_name} {policy_arn}"));
        if !state.roles.contains_key(role_name) {
            return Err(not_found("role", role_name));
        }
        if !state.policies.contains_key(policy_arn) {
            return Err(not_found("policy", policy_arn));
        }
        let attached = state.attachments.entry(role_name.to_string()).or_default();
        if !attached.iter().any(|a| a == policy_arn) {
            attached.push(policy_arn.to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CodeBuild
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CodeBuildState {
    pub projects: BTreeMap<String, BuildProjectSpec>,
    /// Errors returned by successive `create_project` calls before succeeding
    pub create_failures: VecDeque<AwsError>,
    /// Errors returned by successive `start_build` calls before succeeding
    pub start_failures: VecDeque<AwsError>,
    /// Statuses returned by successive polls; the last one repeats
    pub statuses: VecDeque<BuildStatus>,
    /// Errors returned by successive polls before `statuses` is consulted
    pub status_failures: VecDeque<AwsError>,
    pub delete_project_failure: Option<AwsError>,
    /// Cancel this token on the given (1-based) status poll
    pub cancel_on_poll: Option<(u32, CancellationToken)>,

    pub create_calls: u32,
    pub start_calls: u32,
    pub status_calls: u32,
    pub deleted_projects: Vec<String>,
    pub stopped_builds: Vec<String>,
}

#[derive(Default)]
pub struct FakeCodeBuild {
    pub state: Mutex<CodeBuildState>,
}

impl FakeCodeBuild {
    /// A service whose builds report `statuses` in order
    pub fn with_statuses(statuses: &[BuildStatus]) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().statuses = statuses.iter().copied().collect();
        fake
    }

    pub fn fail_creates(&self, errors: impl IntoIterator<Item = AwsError>) {
        self.state.lock().unwrap().create_failures.extend(errors);
    }

    pub fn fail_starts(&self, errors: impl IntoIterator<Item = AwsError>) {
        self.state.lock().unwrap().start_failures.extend(errors);
    }

    pub fn fail_polls(&self, errors: impl IntoIterator<Item = AwsError>) {
        self.state.lock().unwrap().status_failures.extend(errors);
    }

    pub fn fail_project_delete(&self, error: AwsError) {
        self.state.lock().unwrap().delete_project_failure = Some(error);
    }

    pub fn cancel_on_poll(&self, poll: u32, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_poll = Some((poll, token));
    }

    pub fn projects(&self) -> Vec<String> {
        self.state.lock().unwrap().projects.keys().cloned().collect()
    }

    pub fn project_spec(&self, name: &str) -> Option<BuildProjectSpec> {
        self.state.lock().unwrap().projects.get(name).cloned()
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    pub fn start_calls(&self) -> u32 {
        self.state.lock().unwrap().start_calls
    }

    pub fn status_calls(&self) -> u32 {
        self.state.lock().unwrap().status_calls
    }

    pub fn deleted_projects(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_projects.clone()
    }

    pub fn stopped_builds(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped_builds.clone()
    }
}

impl BuildOperations for FakeCodeBuild {
    async fn create_project(&self, spec: &BuildProjectSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if let Some(error) = state.create_failures.pop_front() {
            return Err(anyhow::Error::new(error));
        }
        if state.projects.contains_key(&spec.name) {
            return Err(anyhow::Error::new(AwsError::AlreadyExists));
        }
        state.projects.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn start_build(&self, project_name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.start_calls += 1;
        if let Some(error) = state.start_failures.pop_front() {
            return Err(anyhow::Error::new(error));
        }
        if !state.projects.contains_key(project_name) {
            return Err(not_found("project", project_name));
        }
        Ok(format!("{project_name}:build-{}", state.start_calls))
    }

    async fn build_status(&self, _build_id: &str) -> Result<BuildStatus> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;
        let poll = state.status_calls;
        if let Some((at, token)) = &state.cancel_on_poll {
            if *at == poll {
                token.cancel();
            }
        }
        if let Some(error) = state.status_failures.pop_front() {
            return Err(anyhow::Error::new(error));
        }
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            state.statuses.front().copied()
        };
        Ok(status.unwrap_or(BuildStatus::InProgress))
    }

    async fn stop_build(&self, build_id: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .stopped_builds
            .push(build_id.to_string());
        Ok(())
    }

    async fn delete_project(&self, project_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deleted_projects.push(project_name.to_string());
        if let Some(error) = state.delete_project_failure.clone() {
            return Err(anyhow::Error::new(error));
        }
        match state.projects.remove(project_name) {
            Some(_) => Ok(()),
            None => Err(not_found("project", project_name)),
        }
    }
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StorageState {
    pub buckets: BTreeSet<String>,
    /// (bucket, key) -> uploaded bytes
    pub objects: BTreeMap<(String, String), Vec<u8>>,
    pub uploads: Vec<(String, String)>,
    /// Every upload's bytes, kept after the object is deleted
    pub uploaded_bytes: BTreeMap<(String, String), Vec<u8>>,
    pub deletes: Vec<(String, String)>,
    pub upload_failure: Option<AwsError>,
}

#[derive(Default)]
pub struct FakeStorage {
    pub state: Mutex<StorageState>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_upload(&self, error: AwsError) {
        self.state.lock().unwrap().upload_failure = Some(error);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Bytes of the last upload to `bucket/key`, even if since deleted
    pub fn uploaded(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .uploaded_bytes
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn buckets(&self) -> Vec<String> {
        self.state.lock().unwrap().buckets.iter().cloned().collect()
    }
}

impl StorageOperations for FakeStorage {
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let mut state = self.state.lock().unwrap();
        state.uploads.push((bucket.to_string(), key.to_string()));
        if let Some(error) = state.upload_failure.take() {
            return Err(anyhow::Error::new(error));
        }
        let location = (bucket.to_string(), key.to_string());
        state.uploaded_bytes.insert(location.clone(), bytes.clone());
        state.objects.insert(location, bytes);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push((bucket.to_string(), key.to_string()));
        state
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .insert(bucket.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ECR
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRegistry {
    pub repositories: Mutex<BTreeSet<String>>,
    pub images: Mutex<BTreeSet<(String, String)>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repositories(&self) -> Vec<String> {
        self.repositories.lock().unwrap().iter().cloned().collect()
    }
}

impl RegistryOperations for FakeRegistry {
    async fn create_repository(&self, repository: &str) -> Result<()> {
        self.repositories
            .lock()
            .unwrap()
            .insert(repository.to_string());
        Ok(())
    }

    async fn image_exists(&self, repository: &str, tag: &str) -> Result<bool> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .contains(&(repository.to_string(), tag.to_string())))
    }
}

// ---------------------------------------------------------------------------
// Lambda
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct LambdaState {
    pub functions: BTreeMap<String, FunctionSpec>,
    pub create_failures: VecDeque<AwsError>,
    /// Describes that report "absent" after creation before the function shows up
    pub hidden_describes: u32,
    pub create_calls: u32,
    pub describe_calls: u32,
    /// Fired by every `create_function` call
    pub cancel_on_create: Option<CancellationToken>,
}

#[derive(Default)]
pub struct FakeLambda {
    pub state: Mutex<LambdaState>,
}

impl FakeLambda {
    /// Functions become visible after `hidden` describes
    pub fn visible_after(hidden: u32) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().hidden_describes = hidden;
        fake
    }

    pub fn fail_creates(&self, errors: impl IntoIterator<Item = AwsError>) {
        self.state.lock().unwrap().create_failures.extend(errors);
    }

    pub fn function(&self, name: &str) -> Option<FunctionSpec> {
        self.state.lock().unwrap().functions.get(name).cloned()
    }

    pub fn cancel_on_create(&self, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_create = Some(token);
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    pub fn describe_calls(&self) -> u32 {
        self.state.lock().unwrap().describe_calls
    }
}

impl DeploymentOperations for FakeLambda {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if let Some(token) = &state.cancel_on_create {
            token.cancel();
        }
        if let Some(error) = state.create_failures.pop_front() {
            return Err(anyhow::Error::new(error));
        }
        if state.functions.contains_key(&spec.name) {
            return Err(anyhow::Error::new(AwsError::AlreadyExists));
        }
        state.functions.insert(spec.name.clone(), spec.clone());
        Ok(format!(
            "arn:aws:lambda:us-east-1:{TEST_ACCOUNT}:function:{}",
            spec.name
        ))
    }

    async fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>> {
        let mut state = self.state.lock().unwrap();
        state.describe_calls += 1;
        if state.hidden_describes > 0 {
            state.hidden_describes -= 1;
            return Ok(None);
        }
        Ok(state.functions.get(name).map(|spec| FunctionInfo {
            arn: Some(format!(
                "arn:aws:lambda:us-east-1:{TEST_ACCOUNT}:function:{}",
                spec.name
            )),
            state: Some("Pending".to_string()),
        }))
    }
}
