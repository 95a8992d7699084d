//! Pending and pushed changes against one release branch.
//!
//! ```text
//! Clean --add_patch--> NeedsPatch --mark_patch_applied--> PendingPush
//!   ^                                                         |
//!   |                                                       push
//!   |                                                         v
//! ProductionDeployed <--deploy production-- RcDeployed <--mark_deployed-- Pushed
//! ```
//!
//! Checkout-class operations take the [`WorkingCopy`] and hold one
//! [`CheckoutSession`] for their whole duration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::{FeatureProbe, MaintenanceConfig, ProbeConfig};
use crate::domain::error::{MaintenanceError, Result};
use crate::domain::manifest::{is_commit_sha, DependencyManifest};
use crate::domain::patch::Patch;
use crate::domain::release_branch::{ReleaseBranch, BRAND_PHET, BRAND_PHET_IO};
use crate::domain::version::SimVersion;
use crate::working_copy::{CheckoutSession, WorkingCopy};

/// Separator between pending messages in a push commit.
pub const COMMIT_MESSAGE_SEPARATOR: &str = "; ";

/// A release branch together with the work queued against it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifiedBranch {
    release_branch: Arc<ReleaseBranch>,
    /// Dependency repo -> sha, layered over the branch manifest on push.
    changed_dependencies: BTreeMap<String, String>,
    /// Repos of patches still to be applied, in the order they were needed.
    needed_patches: Vec<String>,
    pending_messages: Vec<String>,
    pushed_messages: Vec<String>,
    deployed_version: Option<SimVersion>,
}

impl ModifiedBranch {
    pub fn new(release_branch: Arc<ReleaseBranch>) -> Self {
        Self {
            release_branch,
            changed_dependencies: BTreeMap::new(),
            needed_patches: Vec::new(),
            pending_messages: Vec::new(),
            pushed_messages: Vec::new(),
            deployed_version: None,
        }
    }

    pub fn release_branch(&self) -> &Arc<ReleaseBranch> {
        &self.release_branch
    }

    pub fn repo(&self) -> &str {
        self.release_branch.repo()
    }

    pub fn branch(&self) -> &str {
        self.release_branch.branch()
    }

    pub fn changed_dependencies(&self) -> &BTreeMap<String, String> {
        &self.changed_dependencies
    }

    pub fn needed_patches(&self) -> &[String] {
        &self.needed_patches
    }

    pub fn needs_patch(&self, patch_repo: &str) -> bool {
        self.needed_patches.iter().any(|p| p == patch_repo)
    }

    pub fn pending_messages(&self) -> &[String] {
        &self.pending_messages
    }

    pub fn pushed_messages(&self) -> &[String] {
        &self.pushed_messages
    }

    pub fn deployed_version(&self) -> Option<&SimVersion> {
        self.deployed_version.as_ref()
    }

    /// Branch a dependency newly added to the manifest is recorded on.
    pub fn dependency_branch(&self) -> String {
        format!("{}-{}", self.repo(), self.branch())
    }

    /// Commit message used by the next [`push`](Self::push).
    ///
    /// Overrides loaded without any message still get a descriptive one.
    pub fn commit_message(&self) -> String {
        if self.pending_messages.is_empty() {
            return format!("Updated dependencies for {} {}", self.repo(), self.branch());
        }
        self.pending_messages.join(COMMIT_MESSAGE_SEPARATOR)
    }

    /// Whether [`push`](Self::push) has anything to commit.
    pub fn has_unpushed_changes(&self) -> bool {
        !self.pending_messages.is_empty() || !self.changed_dependencies.is_empty()
    }

    // -- predicates ---------------------------------------------------------

    /// Nothing needed, changed or pending, and nothing awaiting deployment.
    pub fn is_unused(&self) -> bool {
        self.needed_patches.is_empty()
            && self.changed_dependencies.is_empty()
            && self.pending_messages.is_empty()
            && self.pushed_messages.is_empty()
    }

    /// Pushed work exists that no release candidate has picked up yet.
    pub fn is_ready_for_release_candidate(&self) -> bool {
        self.needed_patches.is_empty()
            && !self.pushed_messages.is_empty()
            && self.deployed_version.is_none()
    }

    /// A release candidate of the pushed work is deployed.
    pub fn is_ready_for_production(&self) -> bool {
        self.needed_patches.is_empty()
            && !self.pushed_messages.is_empty()
            && self
                .deployed_version
                .as_ref()
                .is_some_and(SimVersion::is_release_candidate)
    }

    // -- transitions --------------------------------------------------------

    /// Record that `patch` must be applied to this branch.
    ///
    /// Returns `false` when it was already needed.
    pub fn add_patch(&mut self, patch: &Patch) -> bool {
        if self.needs_patch(&patch.repo) {
            return false;
        }
        self.needed_patches.push(patch.repo.clone());
        true
    }

    /// Record that `patch` landed as `sha` on a branch of its repo.
    ///
    /// Any deployed version no longer matches and is cleared.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::Parse`] when `sha` is not a full commit id.
    pub fn mark_patch_applied(
        &mut self,
        patch: &Patch,
        sha: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        let sha = sha.into();
        if !is_commit_sha(&sha) {
            return Err(MaintenanceError::Parse(format!(
                "invalid sha {sha:?} for {}",
                patch.repo
            )));
        }
        self.needed_patches.retain(|p| p != &patch.repo);
        self.changed_dependencies.insert(patch.repo.clone(), sha);
        self.pending_messages.push(message.into());
        self.deployed_version = None;
        Ok(())
    }

    /// Drop the need for `patch_repo` without applying anything.
    pub fn remove_patch(&mut self, patch_repo: &str) -> bool {
        let before = self.needed_patches.len();
        self.needed_patches.retain(|p| p != patch_repo);
        before != self.needed_patches.len()
    }

    /// Record a deployed release candidate.
    pub fn mark_deployed(&mut self, version: SimVersion) {
        self.deployed_version = Some(version);
    }

    /// Record a production deployment; the pushed work is now released.
    pub fn mark_production_deployed(&mut self, version: SimVersion) {
        self.deployed_version = Some(version);
        self.pushed_messages.clear();
    }

    // -- checkout-class operations ------------------------------------------

    /// Commit the pending dependency changes to the release branch and push.
    ///
    /// The outer error is a failed push: the in-memory state is unchanged
    /// and the working copy is put back best effort. Once the push landed
    /// the state moves on regardless, and the inner result reports whether
    /// the default branches could be restored afterwards.
    #[instrument(skip(self, wc), fields(repo = %self.repo(), branch = %self.branch()))]
    pub async fn push(&mut self, wc: &WorkingCopy) -> Result<Result<()>> {
        if !self.has_unpushed_changes() {
            debug!("nothing to push");
            return Ok(Ok(()));
        }
        let mut session = wc.session().await;
        let result = self.push_in(&mut session).await;
        let restored = session.restore_default_branches().await;
        result?;

        info!(messages = self.pending_messages.len(), "pushed");
        self.pushed_messages.append(&mut self.pending_messages);
        self.changed_dependencies.clear();
        Ok(restored)
    }

    async fn push_in(&self, session: &mut CheckoutSession<'_>) -> Result<()> {
        let (repo, branch) = (self.repo(), self.branch());
        session.checkout(repo, branch).await?;
        session.pull(repo).await?;

        let mut manifest = session.load_manifest(repo).await?;
        manifest.apply_overrides(&self.changed_dependencies, &self.dependency_branch())?;
        session.write_manifest(repo, &manifest).await?;

        let manifest_file = session.working_copy().manifest_file().to_string();
        session.add(repo, &manifest_file).await?;
        session.commit(repo, &self.commit_message()).await?;
        session.push(repo, branch).await
    }

    /// Check out the branch with its effective dependencies (the manifest
    /// plus unpushed changes) and leave them checked out.
    ///
    /// Returns the effective manifest.
    #[instrument(skip(self, wc), fields(repo = %self.repo(), branch = %self.branch()))]
    pub async fn checkout(&self, wc: &WorkingCopy, run_npm_update: bool) -> Result<DependencyManifest> {
        let mut session = wc.session().await;
        let result = self.checkout_in(&mut session, run_npm_update).await;
        session.finish(result).await
    }

    async fn checkout_in(
        &self,
        session: &mut CheckoutSession<'_>,
        run_npm_update: bool,
    ) -> Result<DependencyManifest> {
        let repo = self.repo();
        session.checkout(repo, self.branch()).await?;
        session.pull(repo).await?;
        let mut manifest = session.load_manifest(repo).await?;
        manifest.apply_overrides(&self.changed_dependencies, &self.dependency_branch())?;
        session.checkout_all(&manifest, run_npm_update).await?;
        Ok(manifest)
    }

    /// Manifest of the branch as pushed, read without leaving it checked out.
    pub async fn pushed_manifest(&self, wc: &WorkingCopy) -> Result<DependencyManifest> {
        let mut session = wc.session().await;
        let result = self.pushed_manifest_in(&mut session).await;
        session.restore(result).await
    }

    async fn pushed_manifest_in(&self, session: &mut CheckoutSession<'_>) -> Result<DependencyManifest> {
        session.checkout(self.repo(), self.branch()).await?;
        session.pull(self.repo()).await?;
        session.load_manifest(self.repo()).await
    }

    /// Whether the branch predates the `phetioStandalone` query parameter.
    pub async fn uses_old_phetio_standalone(&self, wc: &WorkingCopy, probes: &ProbeConfig) -> Result<bool> {
        let mut session = wc.session().await;
        let result = self
            .lacks_feature(&mut session, &probes.phetio_standalone)
            .await;
        session.restore(result).await
    }

    /// Whether the branch's wrappers still take `relativeSimPath`.
    pub async fn uses_relative_sim_path(&self, wc: &WorkingCopy, probes: &ProbeConfig) -> Result<bool> {
        let mut session = wc.session().await;
        let result = self
            .lacks_feature(&mut session, &probes.relative_sim_path)
            .await;
        session.restore(result).await
    }

    /// Whether the branch builds with chipper 2.
    pub async fn uses_chipper2(&self, wc: &WorkingCopy, probes: &ProbeConfig) -> Result<bool> {
        let mut session = wc.session().await;
        let result = self.chipper2_in(&mut session, probes).await;
        session.restore(result).await
    }

    /// `true` when the pinned sha of the probe's dependency does not
    /// contain the feature commit, or when the dependency is not pinned.
    async fn lacks_feature(&self, session: &mut CheckoutSession<'_>, probe: &FeatureProbe) -> Result<bool> {
        session.checkout(self.repo(), self.branch()).await?;
        let manifest = session.load_manifest(self.repo()).await?;
        let Some(sha) = manifest.sha(&probe.dependency) else {
            debug!(dependency = %probe.dependency, "dependency not pinned, assuming legacy");
            return Ok(true);
        };
        let has_feature = session
            .is_ancestor(&probe.dependency, &probe.commit, sha)
            .await?;
        Ok(!has_feature)
    }

    async fn chipper2_in(&self, session: &mut CheckoutSession<'_>, probes: &ProbeConfig) -> Result<bool> {
        if let Some(probe) = &probes.chipper2 {
            return Ok(!self.lacks_feature(session, probe).await?);
        }

        session.checkout(self.repo(), self.branch()).await?;
        let manifest = session.load_manifest(self.repo()).await?;
        let Some(sha) = manifest.sha("chipper").map(str::to_string) else {
            return Ok(false);
        };
        session.checkout("chipper", &sha).await?;
        let version = chipper_version(session.working_copy()).await?;
        Ok(version.major() != 0 || version.minor() != 0)
    }

    /// Checklist lines with links to the deployed version of every brand.
    ///
    /// The first line names the branch; with `include_messages` it also
    /// lists the pushed messages.
    pub async fn deployed_link_lines(
        &self,
        wc: &WorkingCopy,
        config: &MaintenanceConfig,
        include_messages: bool,
    ) -> Result<Vec<String>> {
        let Some(version) = &self.deployed_version else {
            return Err(MaintenanceError::Invariant(format!(
                "{} {} has no deployed version",
                self.repo(),
                self.branch()
            )));
        };

        let mut session = wc.session().await;
        let result = self.link_style_in(&mut session, &config.probes).await;
        let style = session.restore(result).await?;

        let mut lines = Vec::new();
        lines.push(if include_messages {
            format!(
                "**{} {}** ({})",
                self.repo(),
                self.branch(),
                self.pushed_messages.join(", ")
            )
        } else {
            format!("**{} {}**", self.repo(), self.branch())
        });
        lines.extend(self.link_lines(version, &style, config));
        Ok(lines)
    }

    async fn link_style_in(&self, session: &mut CheckoutSession<'_>, probes: &ProbeConfig) -> Result<LinkStyle> {
        Ok(LinkStyle {
            old_standalone: self.lacks_feature(session, &probes.phetio_standalone).await?,
            relative_sim_path: self.lacks_feature(session, &probes.relative_sim_path).await?,
            chipper2: self.chipper2_in(session, probes).await?,
        })
    }

    fn link_lines(&self, version: &SimVersion, style: &LinkStyle, config: &MaintenanceConfig) -> Vec<String> {
        let repo = self.repo();
        let hosts = &config.hosts;
        let version_text = version.to_string();
        let standalone = if style.old_standalone {
            "phet-io.standalone"
        } else {
            "phetioStandalone"
        };
        let proxies = if style.relative_sim_path {
            "relativeSimPath"
        } else {
            "launchLocalVersion"
        };

        let (phet_folder, phetio_folder, phet_suffix, phetio_suffix, phetio_brand_suffix, studio_query, phetio_dev_version) =
            if style.chipper2 {
                ("/phet", "/phet-io", "_phet", "_all_phet-io", "", String::new(), version_text.clone())
            } else {
                (
                    "",
                    "",
                    "",
                    "_en-phetio",
                    "-phetio",
                    format!("?sim={repo}&{proxies}"),
                    version_text.replace('-', "-phetio"),
                )
            };

        let mut lines = Vec::new();
        let line = |label: &str, url: String| format!("- [ ] [{repo} {version_text}{label}]({url})");
        if version.is_release_candidate() {
            let base = format!("{}/html/{repo}", hosts.dev);
            if self.release_branch.has_brand(BRAND_PHET) {
                lines.push(line(
                    "",
                    format!("{base}/{version_text}{phet_folder}/{repo}_all{phet_suffix}.html"),
                ));
            }
            if self.release_branch.has_brand(BRAND_PHET_IO) {
                lines.push(line(
                    " phet-io",
                    format!("{base}/{phetio_dev_version}{phetio_folder}/{repo}{phetio_suffix}.html?{standalone}"),
                ));
                lines.push(line(
                    " phet-io Studio",
                    format!("{base}/{phetio_dev_version}{phetio_folder}/wrappers/studio/{studio_query}"),
                ));
            }
        } else {
            if self.release_branch.has_brand(BRAND_PHET) {
                lines.push(line(
                    "",
                    format!("{}/sims/html/{repo}/{version_text}/{repo}_all.html", hosts.production),
                ));
            }
            if self.release_branch.has_brand(BRAND_PHET_IO) {
                let base = format!("{}/sims/{repo}/{version_text}{phetio_brand_suffix}", hosts.phet_io);
                lines.push(line(" phet-io", format!("{base}/{repo}{phetio_suffix}.html?{standalone}")));
                lines.push(line(" phet-io Studio", format!("{base}/wrappers/studio/{studio_query}")));
            }
        }
        lines
    }

    // -- persistence --------------------------------------------------------

    pub fn to_record(&self) -> ModifiedBranchRecord {
        ModifiedBranchRecord {
            release_branch: (*self.release_branch).clone(),
            changed_dependencies: self.changed_dependencies.clone(),
            needed_patches: self.needed_patches.clone(),
            pending_messages: self.pending_messages.clone(),
            pushed_messages: self.pushed_messages.clone(),
            deployed_version: self.deployed_version.clone(),
        }
    }

    /// Rebuild from a persisted record, resolving patch references.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::Reference`] when a needed patch is not in `patches`.
    /// - [`MaintenanceError::Parse`] for malformed shas or repeated patches.
    pub fn from_record(record: ModifiedBranchRecord, patches: &BTreeMap<String, Patch>) -> Result<Self> {
        let name = format!("{} {}", record.release_branch.repo(), record.release_branch.branch());
        let mut needed_patches: Vec<String> = Vec::with_capacity(record.needed_patches.len());
        for patch_repo in record.needed_patches {
            if !patches.contains_key(&patch_repo) {
                return Err(MaintenanceError::Reference {
                    branch: name,
                    patch_repo,
                });
            }
            if needed_patches.contains(&patch_repo) {
                return Err(MaintenanceError::Parse(format!(
                    "{name} lists patch {patch_repo} twice"
                )));
            }
            needed_patches.push(patch_repo);
        }
        if let Some((repo, sha)) = record
            .changed_dependencies
            .iter()
            .find(|(_, sha)| !is_commit_sha(sha))
        {
            return Err(MaintenanceError::Parse(format!(
                "{name} has invalid sha {sha:?} for {repo}"
            )));
        }
        Ok(Self {
            release_branch: Arc::new(record.release_branch),
            changed_dependencies: record.changed_dependencies,
            needed_patches,
            pending_messages: record.pending_messages,
            pushed_messages: record.pushed_messages,
            deployed_version: record.deployed_version,
        })
    }
}

impl fmt::Display for ModifiedBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.release_branch)?;
        if let Some(version) = &self.deployed_version {
            write!(f, " deployed {version}")?;
        }
        for patch in &self.needed_patches {
            write!(f, "\n  needs: {patch}")?;
        }
        for (repo, sha) in &self.changed_dependencies {
            write!(f, "\n  changed: {repo} {sha}")?;
        }
        for message in &self.pending_messages {
            write!(f, "\n  pending: {message}")?;
        }
        for message in &self.pushed_messages {
            write!(f, "\n  pushed: {message}")?;
        }
        Ok(())
    }
}

/// Persisted layout of a [`ModifiedBranch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModifiedBranchRecord {
    pub release_branch: ReleaseBranch,
    #[serde(default)]
    pub changed_dependencies: BTreeMap<String, String>,
    /// Patch repos; resolved against the registry's patches on load.
    #[serde(default)]
    pub needed_patches: Vec<String>,
    #[serde(default)]
    pub pending_messages: Vec<String>,
    #[serde(default)]
    pub pushed_messages: Vec<String>,
    #[serde(default)]
    pub deployed_version: Option<SimVersion>,
}

struct LinkStyle {
    old_standalone: bool,
    relative_sim_path: bool,
    chipper2: bool,
}

#[derive(Deserialize)]
struct PackageJson {
    version: String,
}

async fn chipper_version(wc: &WorkingCopy) -> Result<SimVersion> {
    let path = wc.repo_dir("chipper").join("package.json");
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MaintenanceError::NotFound { path })
        }
        Err(e) => return Err(e.into()),
    };
    let package: PackageJson = serde_json::from_str(&text)
        .map_err(|e| MaintenanceError::Parse(format!("{}: {e}", path.display())))?;
    SimVersion::parse(&package.version, None)
}
