//! Transient resource types and reclaim ordering
//!
//! Everything an invocation creates, except the deployed function, its
//! uploaded deployment archive and the execution identities, is reclaimed
//! before it returns. A build project is always deleted before the archive
//! it points at.

/// Types of resources created during one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// CodeBuild project descriptor
    BuildProject,
    /// Source archive uploaded to S3
    ArchiveObject,
    /// Zip file on local disk
    LocalArchive,
    /// Temporary staging directory on local disk
    StagingDirectory,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::BuildProject => "build-project",
            ResourceKind::ArchiveObject => "archive-object",
            ResourceKind::LocalArchive => "local-archive",
            ResourceKind::StagingDirectory => "staging-directory",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
