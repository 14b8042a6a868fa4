//! Transient resource reclaim
//!
//! Deletes the build project and uploaded archive once a build is terminal,
//! and local temporary files once they have been uploaded. Every step runs
//! regardless of earlier failures; outcomes are collected in a
//! [`ReclaimReport`] rather than returned as errors, so reclaim never
//! replaces the outcome of the work it cleans up after.

use super::progress::ProgressReporter;
use super::types::ObjectLocation;
use crate::archive::Archive;
use crate::aws::{BuildOperations, StorageOperations, classify_anyhow_error};
use imgship_common::ResourceKind;
use tempfile::TempDir;
use tracing::{info, warn};

/// Result of a single resource cleanup operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupResult {
    /// Resource was successfully deleted
    Deleted,
    /// Resource was already deleted (not found)
    AlreadyDeleted,
    /// Cleanup failed with error
    Failed,
    /// Resource was not applicable (e.g. never created)
    Skipped,
}

/// One reclaimed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimStep {
    pub kind: ResourceKind,
    pub id: String,
    pub result: CleanupResult,
}

/// Outcome of every reclaim step of an invocation, in execution order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReclaimReport {
    steps: Vec<ReclaimStep>,
}

impl ReclaimReport {
    pub fn steps(&self) -> &[ReclaimStep] {
        &self.steps
    }

    /// True if nothing failed
    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ReclaimStep> {
        self.steps
            .iter()
            .filter(|s| s.result == CleanupResult::Failed)
    }

    /// Append another report's steps
    pub fn merge(&mut self, other: ReclaimReport) {
        self.steps.extend(other.steps);
    }

    fn record(
        &mut self,
        reporter: &dyn ProgressReporter,
        kind: ResourceKind,
        id: String,
        result: CleanupResult,
    ) {
        reporter.report_reclaimed(kind, &id, result);
        self.steps.push(ReclaimStep { kind, id, result });
    }
}

/// A temporary file or directory on local disk
#[derive(Debug)]
pub enum LocalResource {
    Archive(Archive),
    Directory(TempDir),
}

impl LocalResource {
    fn kind(&self) -> ResourceKind {
        match self {
            LocalResource::Archive(_) => ResourceKind::LocalArchive,
            LocalResource::Directory(_) => ResourceKind::StagingDirectory,
        }
    }

    fn remove(self) -> (String, anyhow::Result<()>) {
        match self {
            LocalResource::Archive(archive) => {
                let id = archive.path().display().to_string();
                (id, archive.remove())
            }
            LocalResource::Directory(dir) => {
                let id = dir.path().display().to_string();
                (id, dir.close().map_err(anyhow::Error::from))
            }
        }
    }
}

/// Delete local temporary files.
pub fn reclaim_local(
    resources: Vec<LocalResource>,
    reporter: &dyn ProgressReporter,
) -> ReclaimReport {
    let mut report = ReclaimReport::default();
    for resource in resources {
        let kind = resource.kind();
        let (id, result) = resource.remove();
        let result = match result {
            Ok(()) => CleanupResult::Deleted,
            Err(e) => {
                warn!(kind = %kind, id = %id, error = ?e, "Failed to remove local file");
                CleanupResult::Failed
            }
        };
        report.record(reporter, kind, id, result);
    }
    report
}

/// Deletes remote build resources
pub struct ResourceReclaimer<'a, B, S> {
    codebuild: &'a B,
    storage: &'a S,
    reporter: &'a dyn ProgressReporter,
}

impl<'a, B, S> ResourceReclaimer<'a, B, S>
where
    B: BuildOperations,
    S: StorageOperations,
{
    pub fn new(codebuild: &'a B, storage: &'a S, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            codebuild,
            storage,
            reporter,
        }
    }

    /// Delete the project (if one was created), then the archive.
    ///
    /// The archive is always deleted, even when the project deletion fails.
    pub async fn reclaim_build(
        &self,
        project: Option<&str>,
        archive: &ObjectLocation,
    ) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        match project {
            Some(name) => {
                let result = self.delete_project(name).await;
                report.record(self.reporter, ResourceKind::BuildProject, name.to_string(), result);
            }
            None => {
                report.record(
                    self.reporter,
                    ResourceKind::BuildProject,
                    String::new(),
                    CleanupResult::Skipped,
                );
            }
        }

        let result = self.delete_archive(archive).await;
        report.record(
            self.reporter,
            ResourceKind::ArchiveObject,
            archive.to_string(),
            result,
        );

        if report.is_clean() {
            info!(archive = %archive, "Build resources reclaimed");
        }
        report
    }

    /// Delete only the uploaded archive
    pub async fn reclaim_archive(&self, archive: &ObjectLocation) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        let result = self.delete_archive(archive).await;
        report.record(
            self.reporter,
            ResourceKind::ArchiveObject,
            archive.to_string(),
            result,
        );
        report
    }

    async fn delete_project(&self, name: &str) -> CleanupResult {
        match self.codebuild.delete_project(name).await {
            Ok(()) => CleanupResult::Deleted,
            Err(e) if classify_anyhow_error(&e).is_not_found() => CleanupResult::AlreadyDeleted,
            Err(e) => {
                warn!(project = %name, error = ?e, "Failed to delete build project");
                CleanupResult::Failed
            }
        }
    }

    async fn delete_archive(&self, archive: &ObjectLocation) -> CleanupResult {
        match self
            .storage
            .delete_object(&archive.bucket, &archive.key)
            .await
        {
            Ok(()) => CleanupResult::Deleted,
            Err(e) if classify_anyhow_error(&e).is_not_found() => CleanupResult::AlreadyDeleted,
            Err(e) => {
                warn!(archive = %archive, error = ?e, "Failed to delete archive");
                CleanupResult::Failed
            }
        }
    }
}
