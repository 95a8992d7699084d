//! Patches: repo-scoped bundles of fix commits.

use serde::{Deserialize, Serialize};

use crate::domain::error::{MaintenanceError, Result};
use crate::domain::manifest::is_commit_sha;

/// A named set of commits in one repository that release branches may need.
///
/// Patches are identified by the repository they target; the registry holds
/// at most one outstanding patch per repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    pub repo: String,
    /// Fix commits in application order.
    pub shas: Vec<String>,
    pub message: String,
}

impl Patch {
    pub fn new(repo: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            shas: Vec::new(),
            message: message.into(),
        }
    }

    /// Append `sha` unless it is already part of the patch.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::Parse`] when `sha` is not a full commit id.
    pub fn add_sha(&mut self, sha: impl Into<String>) -> Result<bool> {
        let sha = sha.into();
        if !is_commit_sha(&sha) {
            return Err(MaintenanceError::Parse(format!(
                "invalid sha {sha:?} for patch {}",
                self.repo
            )));
        }
        if self.shas.contains(&sha) {
            return Ok(false);
        }
        self.shas.push(sha);
        Ok(true)
    }

    pub fn remove_sha(&mut self, sha: &str) -> bool {
        let before = self.shas.len();
        self.shas.retain(|existing| existing != sha);
        before != self.shas.len()
    }
}

impl PartialEq for Patch {
    fn eq(&self, other: &Self) -> bool {
        self.repo == other.repo
    }
}

impl Eq for Patch {}

impl std::fmt::Display for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.repo, self.message)
    }
}
