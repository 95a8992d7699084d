//! Shared working copy of all repository clones.
//!
//! All clones live side by side under one root and every checkout mutates
//! them in place, so two checkout-class operations must never interleave.
//! [`WorkingCopy::session`] hands out a [`CheckoutSession`] that holds the
//! working-copy lock for its whole lifetime; the session is the only way to
//! check out, pull, push or run ancestor queries.
//!
//! A session remembers every repo it moved. [`CheckoutSession::finish`]
//! puts those repos back on the default branch when the operation failed,
//! and [`CheckoutSession::restore`] does so unconditionally.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::MaintenanceConfig;
use crate::domain::error::{MaintenanceError, Result};
use crate::domain::manifest::DependencyManifest;
use crate::exec::{CommandRunner, SystemRunner};
use crate::git::{GitCli, Vcs};

pub const DEFAULT_BRANCH: &str = "master";
pub const MANIFEST_FILE: &str = "dependencies.json";

/// The clone root plus the tools that act on it.
pub struct WorkingCopy {
    root: PathBuf,
    default_branch: String,
    manifest_file: String,
    vcs: Arc<dyn Vcs>,
    runner: Arc<dyn CommandRunner>,
    lock: Mutex<()>,
}

impl WorkingCopy {
    pub fn new(
        root: impl Into<PathBuf>,
        vcs: Arc<dyn Vcs>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            root: root.into(),
            default_branch: DEFAULT_BRANCH.to_string(),
            manifest_file: MANIFEST_FILE.to_string(),
            vcs,
            runner,
            lock: Mutex::new(()),
        }
    }

    /// Working copy driven by real `git`/`npm` processes.
    pub fn from_config(config: &MaintenanceConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let vcs = Arc::new(GitCli::new(&config.root, Arc::clone(&runner)));
        Self::new(&config.root, vcs, runner)
            .with_default_branch(&config.default_branch)
            .with_manifest_file(&config.manifest_file)
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn with_manifest_file(mut self, file: impl Into<String>) -> Self {
        self.manifest_file = file.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    pub fn repo_dir(&self, repo: &str) -> PathBuf {
        self.root.join(repo)
    }

    pub fn manifest_path(&self, repo: &str) -> PathBuf {
        self.repo_dir(repo).join(&self.manifest_file)
    }

    /// Wait for exclusive use of the working copy.
    pub async fn session(&self) -> CheckoutSession<'_> {
        let guard = self.lock.lock().await;
        debug!(root = %self.root.display(), "working copy acquired");
        CheckoutSession {
            wc: self,
            _guard: guard,
            touched: Vec::new(),
        }
    }
}

/// Exclusive access to the working copy for one checkout-class operation.
pub struct CheckoutSession<'a> {
    wc: &'a WorkingCopy,
    _guard: MutexGuard<'a, ()>,
    touched: Vec<String>,
}

impl<'a> CheckoutSession<'a> {
    pub fn working_copy(&self) -> &WorkingCopy {
        self.wc
    }

    /// Repos moved by this session so far, in first-touch order.
    pub fn touched(&self) -> &[String] {
        &self.touched
    }

    fn touch(&mut self, repo: &str) {
        if !self.touched.iter().any(|r| r == repo) {
            self.touched.push(repo.to_string());
        }
    }

    pub async fn checkout(&mut self, repo: &str, target: &str) -> Result<()> {
        self.touch(repo);
        debug!(repo, target, "checkout");
        self.wc.vcs.checkout(repo, target).await
    }

    pub async fn pull(&self, repo: &str) -> Result<()> {
        self.wc.vcs.pull(repo).await
    }

    pub async fn push(&self, repo: &str, remote_branch: &str) -> Result<()> {
        info!(repo, remote_branch, "push");
        self.wc.vcs.push(repo, remote_branch).await
    }

    pub async fn add(&self, repo: &str, file: &str) -> Result<()> {
        self.wc.vcs.add(repo, file).await
    }

    pub async fn commit(&self, repo: &str, message: &str) -> Result<()> {
        self.wc.vcs.commit(repo, message).await
    }

    pub async fn is_ancestor(&self, repo: &str, ancestor: &str, descendant: &str) -> Result<bool> {
        self.wc.vcs.is_ancestor(repo, ancestor, descendant).await
    }

    /// Manifest of `repo` at whatever is currently checked out.
    pub async fn load_manifest(&self, repo: &str) -> Result<DependencyManifest> {
        DependencyManifest::load(&self.wc.manifest_path(repo)).await
    }

    pub async fn write_manifest(&self, repo: &str, manifest: &DependencyManifest) -> Result<()> {
        manifest.write(&self.wc.manifest_path(repo)).await
    }

    /// Refresh node modules for `repo` when it has a `package.json`.
    pub async fn npm_update(&self, repo: &str) -> Result<()> {
        let dir = self.wc.repo_dir(repo);
        if !tokio::fs::try_exists(dir.join("package.json")).await? {
            return Ok(());
        }
        for args in [["prune"], ["update"]] {
            self.wc
                .runner
                .run("npm", &args, &dir)
                .await
                .map_err(|e| MaintenanceError::vcs(repo, &format!("npm {}", args[0]), e))?;
        }
        Ok(())
    }

    /// Check out every manifest entry at its pinned sha.
    ///
    /// Stops at the first failure, leaving earlier repos moved; the caller
    /// recovers through [`finish`](Self::finish).
    #[instrument(skip(self, manifest), fields(repos = manifest.len()))]
    pub async fn checkout_all(
        &mut self,
        manifest: &DependencyManifest,
        run_npm_update: bool,
    ) -> Result<()> {
        for (repo, entry) in manifest.iter() {
            self.checkout(repo, &entry.sha).await?;
            if run_npm_update {
                self.npm_update(repo).await?;
            }
        }
        Ok(())
    }

    /// Put every touched repo back on the default branch, best effort.
    ///
    /// Returns the first failure after attempting all repos.
    pub async fn restore_default_branches(&mut self) -> Result<()> {
        let default_branch = self.wc.default_branch.clone();
        let mut first_error = None;
        for repo in std::mem::take(&mut self.touched) {
            if let Err(e) = self.wc.vcs.checkout(&repo, &default_branch).await {
                warn!(repo = %repo, error = %e, "failed to restore default branch");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// End the session, restoring the default branches if `result` failed.
    pub async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(error = %e, "operation failed, restoring working copy");
            // The original failure is what the caller needs to see.
            let _ = self.restore_default_branches().await;
        }
        result
    }

    /// End the session, always restoring the default branches.
    ///
    /// A restore failure is surfaced only when `result` itself succeeded.
    pub async fn restore<T>(mut self, result: Result<T>) -> Result<T> {
        let restored = self.restore_default_branches().await;
        let value = result?;
        restored?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryVcs, RecordingRunner};

    fn sha(c: char) -> String {
        std::iter::repeat(c).take(40).collect()
    }

    fn working_copy(root: &Path, vcs: Arc<MemoryVcs>, runner: Arc<RecordingRunner>) -> WorkingCopy {
        WorkingCopy::new(root, vcs, runner)
    }

    #[tokio::test]
    async fn checkout_all_visits_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(MemoryVcs::new(dir.path()));
        let wc = working_copy(dir.path(), Arc::clone(&vcs), Arc::new(RecordingRunner::default()));

        let mut manifest = DependencyManifest::new();
        manifest.set("chipper", "master", sha('a')).unwrap();
        manifest.set("joist", "master", sha('b')).unwrap();

        let mut session = wc.session().await;
        session.checkout_all(&manifest, false).await.unwrap();
        assert_eq!(session.touched(), ["chipper", "joist"]);
        session.finish(Ok(())).await.unwrap();

        assert_eq!(vcs.head("chipper").as_deref(), Some(sha('a').as_str()));
        assert_eq!(vcs.head("joist").as_deref(), Some(sha('b').as_str()));
    }

    #[tokio::test]
    async fn finish_restores_default_branch_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(MemoryVcs::new(dir.path()));
        vcs.fail_checkout("joist", &sha('b'));
        let wc = working_copy(dir.path(), Arc::clone(&vcs), Arc::new(RecordingRunner::default()));

        let mut manifest = DependencyManifest::new();
        manifest.set("chipper", "master", sha('a')).unwrap();
        manifest.set("joist", "master", sha('b')).unwrap();

        let mut session = wc.session().await;
        let result = session.checkout_all(&manifest, false).await;
        let err = session.finish(result).await.unwrap_err();
        assert!(err.is_vcs());

        assert_eq!(vcs.head("chipper").as_deref(), Some("master"));
        assert_eq!(vcs.head("joist").as_deref(), Some("master"));
    }

    #[tokio::test]
    async fn finish_leaves_checkout_in_place_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(MemoryVcs::new(dir.path()));
        let wc = working_copy(dir.path(), Arc::clone(&vcs), Arc::new(RecordingRunner::default()));

        let mut session = wc.session().await;
        let result = session.checkout("demo", "1.2").await;
        session.finish(result).await.unwrap();
        assert_eq!(vcs.head("demo").as_deref(), Some("1.2"));
    }

    #[tokio::test]
    async fn restore_always_returns_to_default_branch() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(MemoryVcs::new(dir.path()));
        let wc = working_copy(dir.path(), Arc::clone(&vcs), Arc::new(RecordingRunner::default()))
            .with_default_branch("main");

        let mut session = wc.session().await;
        let result = session.checkout("demo", "1.2").await.map(|_| 7);
        assert_eq!(session.restore(result).await.unwrap(), 7);
        assert_eq!(vcs.head("demo").as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn npm_update_runs_only_with_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("joist")).unwrap();
        std::fs::create_dir_all(dir.path().join("chipper")).unwrap();
        std::fs::write(dir.path().join("chipper").join("package.json"), "{}").unwrap();

        let vcs = Arc::new(MemoryVcs::new(dir.path()));
        let runner = Arc::new(RecordingRunner::default());
        let wc = working_copy(dir.path(), vcs, Arc::clone(&runner));

        let session = wc.session().await;
        session.npm_update("joist").await.unwrap();
        session.npm_update("chipper").await.unwrap();
        drop(session);

        assert_eq!(runner.commands(), vec!["npm prune", "npm update"]);
    }

    #[tokio::test]
    async fn sessions_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(MemoryVcs::new(dir.path()));
        let wc = Arc::new(working_copy(
            dir.path(),
            vcs,
            Arc::new(RecordingRunner::default()),
        ));

        let first = wc.session().await;
        let wc2 = Arc::clone(&wc);
        let waiter = tokio::spawn(async move {
            let _second = wc2.session().await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(first);
        waiter.await.unwrap();
    }
}
