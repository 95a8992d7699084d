//! Domain-level error taxonomy for relmaint.

use std::path::PathBuf;

use crate::exec::ExecError;

/// Errors produced by maintenance operations.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    /// Malformed version string, branch name, manifest or registry document.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// An underlying checkout/pull/push/ancestor-check failed.
    #[error("{operation} failed for {repo}: {source}")]
    Vcs {
        repo: String,
        operation: String,
        #[source]
        source: ExecError,
    },

    /// A modified branch refers to a patch the registry does not hold.
    #[error("{branch} references missing patch for {patch_repo}")]
    Reference { branch: String, patch_repo: String },

    #[error("duplicate entry: {0}")]
    Duplicate(String),

    /// No patch or modified branch is tracked under the given key.
    #[error("not tracked: {0}")]
    Missing(String),

    /// The build server rejected the authorization credential. Never retried.
    #[error("build server rejected authorization: {0}")]
    Authorization(String),

    #[error("build request rejected: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaintenanceError {
    pub(crate) fn vcs(repo: &str, operation: &str, source: ExecError) -> Self {
        Self::Vcs {
            repo: repo.to_string(),
            operation: operation.to_string(),
            source,
        }
    }

    /// `true` for failures of the version-control layer.
    pub fn is_vcs(&self) -> bool {
        matches!(self, Self::Vcs { .. })
    }
}

impl From<reqwest::Error> for MaintenanceError {
    fn from(err: reqwest::Error) -> Self {
        MaintenanceError::Http(err.to_string())
    }
}

/// Result type for maintenance operations.
pub type Result<T> = std::result::Result<T, MaintenanceError>;
