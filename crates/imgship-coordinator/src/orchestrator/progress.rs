//! Progress reporting abstractions for the pipeline
//!
//! Provides a trait and implementations for reporting pipeline progress to
//! different outputs (log lines, a channel consumed by a caller or a test).

use imgship_common::{BuildStatus, ResourceKind};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::cleanup::CleanupResult;

/// Coarse pipeline phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Staging,
    Packaging,
    Uploading,
    ProvisioningIdentity,
    Submitting,
    Polling,
    Reclaiming,
    CreatingFunction,
    AwaitingVisibility,
}

/// A single progress event, as delivered by [`ChannelReporter`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase(PipelinePhase),
    Attempt {
        operation: String,
        attempt: u32,
        max_attempts: u32,
    },
    BuildStatus {
        build_id: String,
        status: BuildStatus,
        elapsed: Duration,
    },
    Reclaimed {
        kind: ResourceKind,
        id: String,
        result: CleanupResult,
    },
}

/// Trait for reporting pipeline progress
///
/// This trait abstracts the progress reporting mechanism, allowing the same
/// pipeline logic to log in the CLI and to be observed in tests.
pub trait ProgressReporter: Send + Sync {
    /// Report a phase change
    fn report_phase(&self, phase: PipelinePhase);

    /// Report the start of an attempt at a retried operation
    fn report_attempt(&self, operation: &str, attempt: u32, max_attempts: u32);

    /// Report one status poll
    fn report_build_status(&self, build_id: &str, status: BuildStatus, elapsed: Duration);

    /// Report the outcome of deleting one transient resource
    fn report_reclaimed(&self, kind: ResourceKind, id: &str, result: CleanupResult);
}

/// Progress reporter that logs through `tracing`
#[derive(Debug, Default)]
pub struct LogReporter;

impl LogReporter {
    /// Create a new log reporter
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for LogReporter {
    fn report_phase(&self, phase: PipelinePhase) {
        info!(phase = ?phase, "Pipeline phase");
    }

    fn report_attempt(&self, operation: &str, attempt: u32, max_attempts: u32) {
        info!(operation = %operation, attempt, max_attempts, "Attempt");
    }

    fn report_build_status(&self, build_id: &str, status: BuildStatus, elapsed: Duration) {
        info!(
            build_id = %build_id,
            status = %status,
            elapsed_secs = elapsed.as_secs(),
            "Waiting for build"
        );
    }

    fn report_reclaimed(&self, kind: ResourceKind, id: &str, result: CleanupResult) {
        match result {
            CleanupResult::Failed => warn!(kind = %kind, id = %id, "Failed to reclaim"),
            _ => info!(kind = %kind, id = %id, result = ?result, "Reclaimed"),
        }
    }
}

/// Progress reporter that forwards events to a channel
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send an event, ignoring errors (receiver may be gone)
    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn report_phase(&self, phase: PipelinePhase) {
        self.send(ProgressEvent::Phase(phase));
    }

    fn report_attempt(&self, operation: &str, attempt: u32, max_attempts: u32) {
        self.send(ProgressEvent::Attempt {
            operation: operation.to_string(),
            attempt,
            max_attempts,
        });
    }

    fn report_build_status(&self, build_id: &str, status: BuildStatus, elapsed: Duration) {
        self.send(ProgressEvent::BuildStatus {
            build_id: build_id.to_string(),
            status,
            elapsed,
        });
    }

    fn report_reclaimed(&self, kind: ResourceKind, id: &str, result: CleanupResult) {
        self.send(ProgressEvent::Reclaimed {
            kind,
            id: id.to_string(),
            result,
        });
    }
}
