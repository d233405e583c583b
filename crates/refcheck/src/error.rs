//! Error types for refcheck

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::compare::ComparisonError;
use crate::stage::Stage;

/// Errors raised while preparing or running a batch
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A collaborator executable or directory is unusable; aborts the batch
    #[error("{what} {reason}: {}", .path.display())]
    PrerequisiteMissing {
        what: String,
        path: PathBuf,
        reason: String,
    },

    /// No case description was selected; aborts the batch
    #[error(
        "no .{extension} files{} found in {}",
        .filter.as_ref().map(|f| format!(" matching '{}'", f)).unwrap_or_default(),
        .dir.display()
    )]
    NoCases {
        dir: PathBuf,
        extension: String,
        filter: Option<String>,
    },

    /// Two case descriptions resolved to the same identifier
    #[error("case '{case}' was recorded twice")]
    DuplicateCase { case: String },

    /// An external invocation failed or left no expected artifact
    #[error("{stage} failed: {reason}")]
    StageFailure { stage: Stage, reason: String },

    /// Test mode ran before any golden artifact was generated
    #[error(
        "no reference image for '{case}' at {} (run `refcheck generate` first)",
        .path.display()
    )]
    MissingReference { case: String, path: PathBuf },

    /// Image decode or scoring failed
    #[error("comparison failed: {0}")]
    Comparison(#[from] ComparisonError),

    /// Filesystem error outside of an external invocation
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl HarnessError {
    pub(crate) fn stage(stage: Stage, reason: impl Into<String>) -> Self {
        HarnessError::StageFailure {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }

    /// The stage this error is attributed to, if any
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            HarnessError::StageFailure { stage, .. } => Some(*stage),
            HarnessError::Comparison(_) => Some(Stage::Compare),
            _ => None,
        }
    }

    /// Whether this error aborts the whole batch rather than a single case
    pub fn is_prerequisite(&self) -> bool {
        matches!(
            self,
            HarnessError::PrerequisiteMissing { .. } | HarnessError::NoCases { .. }
        )
    }
}

/// Result type for refcheck operations
pub type Result<T> = std::result::Result<T, HarnessError>;
