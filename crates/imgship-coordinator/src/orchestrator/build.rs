//! Build job submission, status polling and reclaim
//!
//! A job moves through submit → poll → reclaim exactly once. Whatever
//! happens after the archive is uploaded, the runner deletes the project
//! (if this invocation created one) and then the archive before returning.

use super::cleanup::ResourceReclaimer;
use super::error::PipelineError;
use super::progress::{PipelinePhase, ProgressReporter};
use super::types::{BuildJob, BuildOutcome, JobPhase, ObjectLocation};
use crate::aws::{
    BuildOperations, BuildProjectSpec, StorageOperations, classify_anyhow_error, is_transient,
};
use crate::config::ForgeConfig;
use crate::wait::{Clock, RetryFailure, RetryPolicy, RetryStop, retry_transient, sleep_or_cancel};
use imgship_common::BuildStatus;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Drives one build job from submission to its terminal status
pub struct BuildJobRunner<'a, B, S, C> {
    codebuild: &'a B,
    storage: &'a S,
    clock: &'a C,
    reporter: &'a dyn ProgressReporter,
    submit_policy: RetryPolicy,
    poll_interval: Duration,
    deadline: Option<Duration>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, B, S, C> BuildJobRunner<'a, B, S, C>
where
    B: BuildOperations,
    S: StorageOperations,
    C: Clock,
{
    pub fn new(
        codebuild: &'a B,
        storage: &'a S,
        clock: &'a C,
        reporter: &'a dyn ProgressReporter,
        config: &ForgeConfig,
    ) -> Self {
        Self {
            codebuild,
            storage,
            clock,
            reporter,
            submit_policy: config.retry.policy(),
            poll_interval: config.build.poll_interval,
            deadline: config.build.deadline,
            cancel: None,
        }
    }

    /// Stop submitting or polling when `token` fires
    pub fn with_cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|t| t.is_cancelled())
    }

    /// Submit, poll to a terminal status, then reclaim the project and the
    /// uploaded archive named by `spec`.
    #[instrument(skip_all, fields(project = %spec.name))]
    pub async fn run(&self, spec: BuildProjectSpec) -> Result<BuildOutcome, PipelineError> {
        let archive = ObjectLocation {
            bucket: spec.source_bucket.clone(),
            key: spec.source_key.clone(),
        };
        let reclaimer = ResourceReclaimer::new(self.codebuild, self.storage, self.reporter);
        let mut job = BuildJob::new(spec);

        if self.is_cancelled() {
            self.reporter.report_phase(PipelinePhase::Reclaiming);
            reclaimer.reclaim_archive(&archive).await;
            return Err(PipelineError::Cancelled {
                during: "submitting build".to_string(),
            });
        }

        self.reporter.report_phase(PipelinePhase::Submitting);
        let created = AtomicBool::new(false);
        let attempts = AtomicU32::new(0);
        let submitted = self.submit(&job.spec, &created, &attempts).await;
        let submit_attempts = attempts.load(Ordering::SeqCst);

        let build_id = match submitted {
            Ok(id) => id,
            Err(failure) => {
                self.reporter.report_phase(PipelinePhase::Reclaiming);
                let project = created.load(Ordering::SeqCst).then_some(job.spec.name.as_str());
                reclaimer.reclaim_build(project, &archive).await;
                return Err(match failure.stop {
                    RetryStop::Cancelled => PipelineError::Cancelled {
                        during: "submitting build".to_string(),
                    },
                    RetryStop::Permanent | RetryStop::Exhausted => PipelineError::Submission {
                        project: job.spec.name.clone(),
                        attempts: failure.attempts,
                        source: failure.source,
                    },
                });
            }
        };

        info!(build_id = %build_id, attempts = submit_attempts, "Build started");
        job.build_id = Some(build_id.clone());
        job.advance(JobPhase::Submitted);

        self.reporter.report_phase(PipelinePhase::Polling);
        job.advance(JobPhase::Polling);
        let started = self.clock.now();
        let mut polls = 0u32;
        let polled = self.poll(&build_id, &mut polls).await;
        let elapsed = self.clock.now().saturating_duration_since(started);

        if let Ok(status) = &polled {
            job.advance(JobPhase::Finished(*status));
        }
        if matches!(
            polled,
            Err(PipelineError::PollTimeout { .. } | PipelineError::Cancelled { .. })
        ) {
            self.stop(&build_id).await;
        }

        self.reporter.report_phase(PipelinePhase::Reclaiming);
        let reclaim = reclaimer
            .reclaim_build(Some(&job.spec.name), &archive)
            .await;
        if !reclaim.is_clean() {
            warn!(
                failed = reclaim.failed().count(),
                "Some build resources could not be reclaimed"
            );
        }

        match polled? {
            BuildStatus::Succeeded => {
                info!(build_id = %build_id, polls, elapsed_secs = elapsed.as_secs(), "Build succeeded");
                Ok(BuildOutcome {
                    project_name: job.spec.name.clone(),
                    build_id,
                    status: BuildStatus::Succeeded,
                    polls,
                    elapsed,
                    submit_attempts,
                    reclaim,
                })
            }
            status => Err(PipelineError::BuildFailure { build_id, status }),
        }
    }

    /// Create the project and start the build, retrying transient failures.
    async fn submit(
        &self,
        spec: &BuildProjectSpec,
        created: &AtomicBool,
        attempts: &AtomicU32,
    ) -> Result<String, RetryFailure> {
        let max_attempts = self.submit_policy.max_attempts;

        retry_transient(
            self.clock,
            &self.submit_policy,
            self.cancel,
            "build submission",
            |attempt| async move {
                attempts.store(attempt, Ordering::SeqCst);
                self.reporter
                    .report_attempt("build submission", attempt, max_attempts);

                if !created.load(Ordering::SeqCst) {
                    match self.codebuild.create_project(spec).await {
                        Ok(()) => created.store(true, Ordering::SeqCst),
                        // Only a retry can find the project an earlier attempt made
                        Err(e) if attempt > 1 && classify_anyhow_error(&e).is_already_exists() => {
                            debug!(project = %spec.name, "Project exists from an earlier attempt");
                            created.store(true, Ordering::SeqCst);
                        }
                        Err(e) => return Err(e),
                    }
                }

                self.codebuild.start_build(&spec.name).await
            },
        )
        .await
    }

    /// Poll until a terminal status, the deadline, or cancellation.
    async fn poll(&self, build_id: &str, polls: &mut u32) -> Result<BuildStatus, PipelineError> {
        let started = self.clock.now();

        loop {
            if self.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    during: format!("polling build {build_id}"),
                });
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if self.deadline.is_some_and(|deadline| elapsed >= deadline) {
                warn!(build_id = %build_id, waited_secs = elapsed.as_secs(), "Build deadline expired");
                return Err(PipelineError::PollTimeout {
                    build_id: build_id.to_string(),
                    waited: elapsed,
                });
            }

            *polls += 1;
            match self.codebuild.build_status(build_id).await {
                Ok(status) => {
                    self.reporter.report_build_status(build_id, status, elapsed);
                    if status.is_terminal() {
                        info!(build_id = %build_id, status = %status, "Build finished");
                        return Ok(status);
                    }
                }
                Err(e) if is_transient(&e) => {
                    warn!(build_id = %build_id, error = %e, "Transient error polling build status");
                }
                Err(e) => {
                    return Err(PipelineError::StatusPoll {
                        build_id: build_id.to_string(),
                        source: e,
                    });
                }
            }

            let delay = match self.deadline {
                Some(deadline) => self.poll_interval.min(deadline.saturating_sub(elapsed)),
                None => self.poll_interval,
            };
            if !sleep_or_cancel(self.clock, delay, self.cancel).await {
                return Err(PipelineError::Cancelled {
                    during: format!("polling build {build_id}"),
                });
            }
        }
    }

    /// Ask the build service to stop the build, logging any failure.
    async fn stop(&self, build_id: &str) {
        match self.codebuild.stop_build(build_id).await {
            Ok(()) => info!(build_id = %build_id, "Requested build stop"),
            Err(e) => warn!(build_id = %build_id, error = ?e, "Failed to stop build"),
        }
    }
}
