//! Maintenance session: the registry, the working copy and the build server
//! behind one set of operations.
//!
//! Every mutation is persisted before the call returns. Operations that
//! touch the version-control layer persist only after that step succeeded,
//! so the document never describes work that did not happen.

use std::path::PathBuf;

use tracing::{info, instrument, warn};

use crate::build_trigger::{BuildRequest, BuildTrigger, TargetServer};
use crate::config::MaintenanceConfig;
use crate::domain::error::{MaintenanceError, Result};
use crate::domain::manifest::DependencyManifest;
use crate::domain::modified_branch::ModifiedBranch;
use crate::domain::patch::Patch;
use crate::domain::release_branch::ReleaseBranch;
use crate::domain::version::SimVersion;
use crate::registry::{BranchKey, BranchRegistry};
use crate::working_copy::WorkingCopy;

/// Locales built for a release candidate.
const RC_LOCALES: &[&str] = &["en"];
/// Locales built for production.
const PRODUCTION_LOCALES: &[&str] = &["*"];

pub struct Maintenance {
    config: MaintenanceConfig,
    registry_path: PathBuf,
    registry: BranchRegistry,
    working_copy: WorkingCopy,
}

impl Maintenance {
    /// Load the registry named by `config` over `working_copy`.
    pub fn load(config: MaintenanceConfig, working_copy: WorkingCopy) -> Result<Self> {
        let registry_path = config.registry_path.clone();
        let registry = BranchRegistry::load(&registry_path)?;
        info!(
            path = %registry_path.display(),
            patches = registry.patches().count(),
            branches = registry.branches().count(),
            "registry loaded"
        );
        Ok(Self {
            config,
            registry_path,
            registry,
            working_copy,
        })
    }

    /// Load with a working copy driven by real `git` and `npm`.
    pub fn open(config: MaintenanceConfig) -> Result<Self> {
        let working_copy = WorkingCopy::from_config(&config);
        Self::load(config, working_copy)
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn registry(&self) -> &BranchRegistry {
        &self.registry
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.working_copy
    }

    fn persist(&self) -> Result<()> {
        self.registry.persist(&self.registry_path)
    }

    // -- patches ------------------------------------------------------------

    pub fn create_patch(&mut self, repo: &str, message: &str) -> Result<()> {
        self.registry.add_patch(Patch::new(repo, message))?;
        info!(repo, "patch created");
        self.persist()
    }

    /// Returns `false` when the sha was already part of the patch.
    pub fn add_patch_sha(&mut self, repo: &str, sha: &str) -> Result<bool> {
        let added = self.registry.patch_mut(repo)?.add_sha(sha)?;
        if added {
            self.persist()?;
        }
        Ok(added)
    }

    pub fn remove_patch_sha(&mut self, repo: &str, sha: &str) -> Result<bool> {
        let removed = self.registry.patch_mut(repo)?.remove_sha(sha);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn remove_patch(&mut self, repo: &str) -> Result<Patch> {
        let patch = self.registry.remove_patch(repo)?;
        info!(repo, "patch removed");
        self.persist()?;
        Ok(patch)
    }

    // -- branches -----------------------------------------------------------

    /// Mark `release_branch` as needing the patch for `patch_repo`.
    pub fn add_needed_patch(&mut self, release_branch: ReleaseBranch, patch_repo: &str) -> Result<bool> {
        let added = self.registry.add_needed_patch(release_branch, patch_repo)?;
        if added {
            self.persist()?;
        }
        Ok(added)
    }

    /// Record that the patch for `patch_repo` landed as `sha` for `repo branch`.
    pub fn apply_patch(
        &mut self,
        repo: &str,
        branch: &str,
        patch_repo: &str,
        sha: &str,
        message: &str,
    ) -> Result<()> {
        self.registry
            .mark_patch_applied(repo, branch, patch_repo, sha, message)?;
        info!(repo, branch, patch_repo, sha, "patch applied");
        self.persist()
    }

    /// Push the pending changes of one branch.
    ///
    /// A push that landed is persisted even when the working copy could not
    /// be put back afterwards; that restore failure is returned once the
    /// registry is saved.
    #[instrument(skip(self))]
    pub async fn push_branch(&mut self, repo: &str, branch: &str) -> Result<()> {
        let mb = self.registry.branch_mut(repo, branch)?;
        let restored = mb.push(&self.working_copy).await?;
        self.persist()?;
        restored
    }

    /// Push every branch with pending changes, stopping at the first
    /// failure. Returns the branches pushed.
    pub async fn push_all(&mut self) -> Result<Vec<BranchKey>> {
        let pending: Vec<BranchKey> = self
            .registry
            .branches()
            .filter(|mb| mb.has_unpushed_changes())
            .map(|mb| BranchKey::new(mb.repo(), mb.branch()))
            .collect();
        for key in &pending {
            self.push_branch(&key.repo, &key.branch).await?;
        }
        Ok(pending)
    }

    /// Check out a branch with its effective dependencies.
    pub async fn checkout_branch(
        &self,
        repo: &str,
        branch: &str,
        run_npm_update: bool,
    ) -> Result<DependencyManifest> {
        let mb = self.tracked(repo, branch)?;
        mb.checkout(&self.working_copy, run_npm_update).await
    }

    /// Checklist lines for the deployed version of a branch.
    pub async fn deployed_links(&self, repo: &str, branch: &str, include_messages: bool) -> Result<Vec<String>> {
        let mb = self.tracked(repo, branch)?;
        mb.deployed_link_lines(&self.working_copy, &self.config, include_messages)
            .await
    }

    /// Queue a release-candidate build of the pushed work and record it.
    #[instrument(skip(self, trigger))]
    pub async fn deploy_release_candidate(
        &mut self,
        repo: &str,
        branch: &str,
        version: SimVersion,
        trigger: &dyn BuildTrigger,
    ) -> Result<SimVersion> {
        let mb = self.tracked(repo, branch)?;
        if !mb.is_ready_for_release_candidate() {
            return Err(MaintenanceError::Invariant(format!(
                "{repo} {branch} is not ready for a release candidate"
            )));
        }
        if !version.is_release_candidate() {
            return Err(MaintenanceError::Validation(format!(
                "{version} is not a release candidate version"
            )));
        }
        check_version_matches_branch(mb.release_branch(), &version)?;

        let request = self
            .build_request(repo, branch, &version, RC_LOCALES, TargetServer::Dev)
            .await?;
        trigger.trigger(&request).await?;

        let deployed = version.with_build_timestamp(chrono::Utc::now().to_rfc3339());
        self.registry
            .branch_mut(repo, branch)?
            .mark_deployed(deployed.clone());
        info!(repo, branch, version = %deployed, "release candidate deployed");
        self.persist()?;
        Ok(deployed)
    }

    /// Queue a production build of the tested release candidate.
    #[instrument(skip(self, trigger))]
    pub async fn deploy_production(
        &mut self,
        repo: &str,
        branch: &str,
        version: SimVersion,
        trigger: &dyn BuildTrigger,
    ) -> Result<SimVersion> {
        let mb = self.tracked(repo, branch)?;
        if !mb.is_ready_for_production() {
            return Err(MaintenanceError::Invariant(format!(
                "{repo} {branch} is not ready for production"
            )));
        }
        if version.test_type().is_some() {
            return Err(MaintenanceError::Validation(format!(
                "{version} carries a test qualifier"
            )));
        }
        if let Some(rc) = mb.deployed_version() {
            if rc.compare_number(&version).is_ne() {
                return Err(MaintenanceError::Validation(format!(
                    "{version} does not match the deployed release candidate {rc}"
                )));
            }
        }

        let request = self
            .build_request(repo, branch, &version, PRODUCTION_LOCALES, TargetServer::Production)
            .await?;
        trigger.trigger(&request).await?;

        let deployed = version.with_build_timestamp(chrono::Utc::now().to_rfc3339());
        self.registry
            .branch_mut(repo, branch)?
            .mark_production_deployed(deployed.clone());
        info!(repo, branch, version = %deployed, "production deployed");
        self.persist()?;
        Ok(deployed)
    }

    async fn build_request(
        &self,
        repo: &str,
        branch: &str,
        version: &SimVersion,
        locales: &[&str],
        server: TargetServer,
    ) -> Result<BuildRequest> {
        let mb = self.tracked(repo, branch)?;
        let dependencies = mb.pushed_manifest(&self.working_copy).await?;
        Ok(BuildRequest {
            repo: repo.to_string(),
            branch: branch.to_string(),
            version: version.clone(),
            brands: mb.release_branch().brands().to_vec(),
            locales: locales.iter().map(|l| l.to_string()).collect(),
            servers: vec![server],
            dependencies,
        })
    }

    // -- housekeeping -------------------------------------------------------

    /// Drop branches with nothing left to do.
    pub fn prune(&mut self) -> Result<Vec<BranchKey>> {
        let pruned = self.registry.prune();
        if !pruned.is_empty() {
            self.persist()?;
        }
        Ok(pruned)
    }

    /// Human-readable summary of every patch and branch.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for patch in self.registry.patches() {
            lines.push(format!("{patch} ({} shas)", patch.shas.len()));
        }
        let mut branches: Vec<_> = self.registry.branches().collect();
        branches.sort_by(|a, b| a.release_branch().compare(b.release_branch()));
        for mb in branches {
            let state = if mb.is_ready_for_production() {
                "ready for production"
            } else if mb.is_ready_for_release_candidate() {
                "ready for rc"
            } else if !mb.needed_patches().is_empty() {
                "needs patches"
            } else if mb.has_unpushed_changes() {
                "pending push"
            } else {
                "clean"
            };
            let text = mb.to_string();
            let mut details = text.lines();
            if let Some(first) = details.next() {
                lines.push(format!("{first} <{state}>"));
            }
            lines.extend(details.map(str::to_string));
        }
        lines
    }

    fn tracked(&self, repo: &str, branch: &str) -> Result<&ModifiedBranch> {
        self.registry
            .branch(repo, branch)
            .ok_or_else(|| MaintenanceError::Missing(format!("modified branch {repo} {branch}")))
    }
}

fn check_version_matches_branch(release_branch: &ReleaseBranch, version: &SimVersion) -> Result<()> {
    match release_branch.version() {
        Ok(line) if line.major() == version.major() && line.minor() == version.minor() => Ok(()),
        Ok(line) => Err(MaintenanceError::Validation(format!(
            "{version} is not on the {}.{} line",
            line.major(),
            line.minor()
        ))),
        Err(e) => {
            warn!(branch = %release_branch.branch(), error = %e, "branch name has no version");
            Ok(())
        }
    }
}
