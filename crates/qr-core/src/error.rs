//! Error types for the qualification runner
//!
//! Provides error handling for:
//! - Plan loading and referential integrity
//! - Asset acquisition
//! - Worker validation and run failures
//! - Report aggregation

use crate::engine::RunMode;
use qr_assets::AssetError;
use qr_plan::PlanError;
use std::fmt;
use std::path::PathBuf;

/// Main qualification error type
#[derive(Debug, thiserror::Error)]
pub enum QualificationError {
    /// Plan could not be loaded or is incomplete
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Asset could not be acquired
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// A reference names a project id the plan does not define
    #[error("Referenced project '{project}' is not defined in qualification file")]
    DanglingReference { project: String },

    /// Worker executable is missing
    #[error("'{path}' does not exist on your computer.")]
    WorkerNotFound { path: PathBuf },

    /// At least one project failed validation
    #[error("{}", summarize(.failures))]
    ProjectValidationFailed { failures: Vec<ProjectFailure> },

    /// At least one project failed to run
    #[error("{}", summarize(.failures))]
    ProjectRunFailed { failures: Vec<ProjectFailure> },

    /// Output folder has content and deletion was not forced
    #[error("Output folder '{path}' is not empty. Please use -f to force deletion of its content.")]
    OutputNotEmpty { path: PathBuf },

    /// Mapping artifact of a successful project is missing or malformed
    #[error("Cannot aggregate project '{project}' from '{mapping_file}': {reason}")]
    Aggregation {
        project: String,
        mapping_file: PathBuf,
        reason: String,
    },

    /// IO error
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be serialized
    #[error("cannot serialize {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Batch was cancelled
    #[error("qualification run cancelled")]
    Cancelled,
}

impl QualificationError {
    /// Create dangling reference error
    #[inline]
    pub fn dangling(project: impl Into<String>) -> Self {
        Self::DanglingReference {
            project: project.into(),
        }
    }

    /// Create IO error for path
    #[inline]
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create serialization error for path
    #[inline]
    pub fn serialization_error(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }

    /// Check if error is a cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Failing projects of a validation or run barrier
    #[must_use]
    pub fn failures(&self) -> &[ProjectFailure] {
        match self {
            Self::ProjectValidationFailed { failures } | Self::ProjectRunFailed { failures } => {
                failures
            }
            _ => &[],
        }
    }
}

/// One project whose worker did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFailure {
    pub project: String,
    pub log_file: PathBuf,
    pub mode: RunMode,
}

impl ProjectFailure {
    #[inline]
    pub fn new(project: impl Into<String>, log_file: impl Into<PathBuf>, mode: RunMode) -> Self {
        Self {
            project: project.into(),
            log_file: log_file.into(),
            mode,
        }
    }
}

impl fmt::Display for ProjectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            RunMode::Validate => write!(
                f,
                "Project configuration for '{}' is invalid. Please check one of the log files at '{}' for details.",
                self.project,
                self.log_file.display()
            ),
            RunMode::Run => write!(
                f,
                "Project '{}' failed to run. Please check one of the log files at '{}' for details.",
                self.project,
                self.log_file.display()
            ),
        }
    }
}

fn summarize(failures: &[ProjectFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
