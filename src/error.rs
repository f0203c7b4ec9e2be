/// Error taxonomy surfaced by the orchestrator
///
/// Business-rule failures (validation, precondition, not found) are recovered into
/// structured variants; everything else is an infrastructure fault that rolls back
/// the surrounding transaction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single violated input rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON pointer to the offending value ("" for the root)
    pub path: String,
    /// Human-readable description of the violated rule
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        Self::Infrastructure(err.into())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infrastructure(err.into())
    }
}

impl OrchestratorError {
    /// Whether the failure is caused by caller input or current state rather than the platform
    pub fn is_business_failure(&self) -> bool {
        !matches!(self, Self::Infrastructure(_))
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
