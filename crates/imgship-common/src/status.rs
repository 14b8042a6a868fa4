//! Remote build status values
//!
//! Mirrors the CodeBuild `StatusType` strings. `IN_PROGRESS` is the only
//! non-terminal value; every other status ends the job.

/// Status reported by the remote build service for one build
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    /// Still running
    InProgress,
    /// Image built and pushed
    Succeeded,
    /// Build commands failed
    Failed,
    /// Build service internal error
    Fault,
    /// Build was stopped
    Stopped,
    /// Build exceeded its own timeout
    TimedOut,
}

impl BuildStatus {
    /// Whether no further transition happens from this status
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// `SUCCEEDED` is the only successful terminal status
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Parse from the service's string form, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn parses_service_strings() {
        assert_eq!(BuildStatus::parse("IN_PROGRESS"), Some(BuildStatus::InProgress));
        assert_eq!(BuildStatus::parse("SUCCEEDED"), Some(BuildStatus::Succeeded));
        assert_eq!(BuildStatus::parse("TIMED_OUT"), Some(BuildStatus::TimedOut));
        assert_eq!(BuildStatus::parse("fault"), Some(BuildStatus::Fault));
        assert_eq!(BuildStatus::parse("PENDING"), None);
    }

    #[test]
    fn display_matches_service_strings() {
        for status in BuildStatus::iter() {
            assert_eq!(BuildStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(BuildStatus::TimedOut.to_string(), "TIMED_OUT");
    }

    #[test]
    fn only_succeeded_is_success() {
        let successes: Vec<_> = BuildStatus::iter().filter(|s| s.is_success()).collect();
        assert_eq!(successes, vec![BuildStatus::Succeeded]);
    }

    #[test]
    fn only_in_progress_is_non_terminal() {
        for status in BuildStatus::iter() {
            assert_eq!(status.is_terminal(), status != BuildStatus::InProgress);
        }
    }
}
