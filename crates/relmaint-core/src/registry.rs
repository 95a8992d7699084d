//! Registry of outstanding patches and modified branches, persisted as one
//! JSON document.
//!
//! ```json
//! { "patches": [ ... ], "modifiedBranches": [ ... ] }
//! ```
//!
//! Branches refer to patches by repo; loading fails if a reference does not
//! resolve. Writes go through a temporary file in the same directory so a
//! crash never leaves a truncated document behind.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::domain::error::{MaintenanceError, Result};
use crate::domain::modified_branch::{ModifiedBranch, ModifiedBranchRecord};
use crate::domain::patch::Patch;
use crate::domain::release_branch::ReleaseBranch;

/// Identity of a modified branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchKey {
    pub repo: String,
    pub branch: String,
}

impl BranchKey {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.repo, self.branch)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RegistryDocument {
    #[serde(default)]
    patches: Vec<Patch>,
    #[serde(default)]
    modified_branches: Vec<ModifiedBranchRecord>,
}

/// All patches and modified branches under maintenance.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BranchRegistry {
    patches: BTreeMap<String, Patch>,
    branches: BTreeMap<BranchKey, ModifiedBranch>,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry at `path`; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no registry yet");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let document: RegistryDocument = serde_json::from_str(text)
            .map_err(|e| MaintenanceError::Parse(format!("registry: {e}")))?;

        let mut registry = Self::new();
        for patch in document.patches {
            if let Some(sha) = patch
                .shas
                .iter()
                .find(|sha| !crate::domain::manifest::is_commit_sha(sha))
            {
                return Err(MaintenanceError::Parse(format!(
                    "patch {} has invalid sha {sha:?}",
                    patch.repo
                )));
            }
            registry.add_patch(patch)?;
        }
        for record in document.modified_branches {
            let branch = ModifiedBranch::from_record(record, &registry.patches)?;
            registry.insert_branch(branch)?;
        }
        Ok(registry)
    }

    pub fn to_json_string(&self) -> Result<String> {
        let document = RegistryDocument {
            patches: self.patches.values().cloned().collect(),
            modified_branches: self.branches.values().map(ModifiedBranch::to_record).collect(),
        };
        let mut text = serde_json::to_string_pretty(&document)
            .map_err(|e| MaintenanceError::Parse(format!("registry: {e}")))?;
        text.push('\n');
        Ok(text)
    }

    /// Atomically replace the document at `path`.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let text = self.to_json_string()?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        debug!(
            path = %path.display(),
            patches = self.patches.len(),
            branches = self.branches.len(),
            "registry persisted"
        );
        Ok(())
    }

    // -- patches ------------------------------------------------------------

    pub fn patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    pub fn patch(&self, repo: &str) -> Option<&Patch> {
        self.patches.get(repo)
    }

    pub fn patch_mut(&mut self, repo: &str) -> Result<&mut Patch> {
        self.patches
            .get_mut(repo)
            .ok_or_else(|| MaintenanceError::Missing(format!("patch for {repo}")))
    }

    /// Track a new patch. One patch per repo.
    pub fn add_patch(&mut self, patch: Patch) -> Result<()> {
        if self.patches.contains_key(&patch.repo) {
            return Err(MaintenanceError::Duplicate(format!("patch for {}", patch.repo)));
        }
        self.patches.insert(patch.repo.clone(), patch);
        Ok(())
    }

    /// Stop tracking a patch no branch still needs.
    pub fn remove_patch(&mut self, repo: &str) -> Result<Patch> {
        if let Some(key) = self.branches_needing(repo).next() {
            return Err(MaintenanceError::Invariant(format!(
                "patch for {repo} is still needed by {key}"
            )));
        }
        self.patches
            .remove(repo)
            .ok_or_else(|| MaintenanceError::Missing(format!("patch for {repo}")))
    }

    /// Keys of branches that still need the patch for `patch_repo`.
    pub fn branches_needing<'a>(&'a self, patch_repo: &'a str) -> impl Iterator<Item = &'a BranchKey> + 'a {
        self.branches
            .iter()
            .filter(move |(_, mb)| mb.needs_patch(patch_repo))
            .map(|(key, _)| key)
    }

    // -- branches -----------------------------------------------------------

    pub fn branches(&self) -> impl Iterator<Item = &ModifiedBranch> {
        self.branches.values()
    }

    pub fn branch(&self, repo: &str, branch: &str) -> Option<&ModifiedBranch> {
        self.branches.get(&BranchKey::new(repo, branch))
    }

    pub fn branch_mut(&mut self, repo: &str, branch: &str) -> Result<&mut ModifiedBranch> {
        self.branches
            .get_mut(&BranchKey::new(repo, branch))
            .ok_or_else(|| MaintenanceError::Missing(format!("modified branch {repo} {branch}")))
    }

    /// Track `branch`. At most one entry per `(repo, branch)`.
    pub fn insert_branch(&mut self, branch: ModifiedBranch) -> Result<&mut ModifiedBranch> {
        let key = BranchKey::new(branch.repo(), branch.branch());
        match self.branches.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => Err(
                MaintenanceError::Duplicate(format!("modified branch {}", entry.key())),
            ),
            std::collections::btree_map::Entry::Vacant(entry) => Ok(entry.insert(branch)),
        }
    }

    /// The entry for `release_branch`, created clean if absent.
    pub fn ensure_branch(&mut self, release_branch: ReleaseBranch) -> &mut ModifiedBranch {
        let key = BranchKey::new(release_branch.repo(), release_branch.branch());
        self.branches
            .entry(key)
            .or_insert_with(|| ModifiedBranch::new(Arc::new(release_branch)))
    }

    pub fn remove_branch(&mut self, repo: &str, branch: &str) -> Option<ModifiedBranch> {
        self.branches.remove(&BranchKey::new(repo, branch))
    }

    /// Record that the branch needs the patch for `patch_repo`.
    ///
    /// Returns `false` when it was already needed.
    pub fn add_needed_patch(&mut self, release_branch: ReleaseBranch, patch_repo: &str) -> Result<bool> {
        let patch = self
            .patches
            .get(patch_repo)
            .ok_or_else(|| MaintenanceError::Missing(format!("patch for {patch_repo}")))?;
        let key = BranchKey::new(release_branch.repo(), release_branch.branch());
        let branch = self
            .branches
            .entry(key)
            .or_insert_with(|| ModifiedBranch::new(Arc::new(release_branch)));
        Ok(branch.add_patch(patch))
    }

    /// Record that the patch for `patch_repo` landed on `repo branch` as `sha`.
    pub fn mark_patch_applied(
        &mut self,
        repo: &str,
        branch: &str,
        patch_repo: &str,
        sha: &str,
        message: &str,
    ) -> Result<()> {
        let patch = self
            .patches
            .get(patch_repo)
            .ok_or_else(|| MaintenanceError::Missing(format!("patch for {patch_repo}")))?;
        let mb = self
            .branches
            .get_mut(&BranchKey::new(repo, branch))
            .ok_or_else(|| MaintenanceError::Missing(format!("modified branch {repo} {branch}")))?;
        mb.mark_patch_applied(patch, sha, message)
    }

    /// Drop every unused branch, returning the keys removed.
    pub fn prune(&mut self) -> Vec<BranchKey> {
        let unused: Vec<BranchKey> = self
            .branches
            .iter()
            .filter(|(_, mb)| mb.is_unused())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &unused {
            self.branches.remove(key);
        }
        if !unused.is_empty() {
            info!(count = unused.len(), "pruned unused branches");
        }
        unused
    }
}
