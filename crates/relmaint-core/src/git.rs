//! Version-control primitives over the shared clone root.
//!
//! Repositories are addressed by name; `<root>/<repo>` is the clone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::{MaintenanceError, Result};
use crate::exec::{CommandRunner, SystemRunner};

/// Version-control operations the maintenance core depends on.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Check out `target` (branch name or commit SHA) in `repo`.
    async fn checkout(&self, repo: &str, target: &str) -> Result<()>;

    /// Fast-forward the current branch of `repo` from its remote.
    async fn pull(&self, repo: &str) -> Result<()>;

    /// Push the current branch of `repo` to `remote_branch` on origin.
    async fn push(&self, repo: &str, remote_branch: &str) -> Result<()>;

    /// Stage `file` (relative to the repo root).
    async fn add(&self, repo: &str, file: &str) -> Result<()>;

    async fn commit(&self, repo: &str, message: &str) -> Result<()>;

    /// Whether `ancestor` is an ancestor of `descendant`.
    ///
    /// "Not an ancestor" is `Ok(false)`; only genuine failures are errors.
    async fn is_ancestor(&self, repo: &str, ancestor: &str, descendant: &str) -> Result<bool>;

    async fn head_sha(&self, repo: &str) -> Result<String>;

    async fn current_branch(&self, repo: &str) -> Result<String>;
}

/// [`Vcs`] implemented by shelling out to `git`.
pub struct GitCli {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    /// `GitCli` running real `git` processes.
    pub fn system(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(SystemRunner))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, repo: &str, operation: &str, args: &[&str]) -> Result<String> {
        self.runner
            .run("git", args, &self.root.join(repo))
            .await
            .map_err(|e| MaintenanceError::vcs(repo, operation, e))
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn checkout(&self, repo: &str, target: &str) -> Result<()> {
        self.git(repo, "checkout", &["checkout", target]).await?;
        Ok(())
    }

    async fn pull(&self, repo: &str) -> Result<()> {
        self.git(repo, "pull", &["pull"]).await?;
        Ok(())
    }

    async fn push(&self, repo: &str, remote_branch: &str) -> Result<()> {
        self.git(repo, "push", &["push", "-u", "origin", remote_branch])
            .await?;
        Ok(())
    }

    async fn add(&self, repo: &str, file: &str) -> Result<()> {
        self.git(repo, "add", &["add", file]).await?;
        Ok(())
    }

    async fn commit(&self, repo: &str, message: &str) -> Result<()> {
        self.git(repo, "commit", &["commit", "--no-verify", "-m", message])
            .await?;
        Ok(())
    }

    async fn is_ancestor(&self, repo: &str, ancestor: &str, descendant: &str) -> Result<bool> {
        match self
            .runner
            .run(
                "git",
                &["merge-base", "--is-ancestor", ancestor, descendant],
                &self.root.join(repo),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.code() == Some(1) => Ok(false),
            Err(e) => Err(MaintenanceError::vcs(repo, "ancestor check", e)),
        }
    }

    async fn head_sha(&self, repo: &str) -> Result<String> {
        let sha = self.git(repo, "rev-parse", &["rev-parse", "HEAD"]).await?;
        let sha = sha.trim().to_string();
        if sha.is_empty() {
            return Err(MaintenanceError::Parse(format!(
                "git rev-parse HEAD returned empty output in {repo}"
            )));
        }
        Ok(sha)
    }

    async fn current_branch(&self, repo: &str) -> Result<String> {
        let branch = self
            .git(repo, "rev-parse", &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(branch.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Clone root holding one repo `demo` with two commits on `master` and
    /// one extra commit on branch `1.0`.
    fn make_clone_root() -> (tempfile::TempDir, String, String, String) {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("demo");
        std::fs::create_dir_all(&repo).unwrap();
        run_git(&repo, &["init", "-b", "master"]);
        run_git(&repo, &["config", "user.name", "test-user"]);
        run_git(&repo, &["config", "user.email", "test@example.com"]);
        run_git(&repo, &["commit", "--allow-empty", "-m", "initial"]);
        let first = run_git(&repo, &["rev-parse", "HEAD"]);
        run_git(&repo, &["commit", "--allow-empty", "-m", "second"]);
        let second = run_git(&repo, &["rev-parse", "HEAD"]);
        run_git(&repo, &["checkout", "-b", "1.0", &first]);
        run_git(&repo, &["commit", "--allow-empty", "-m", "branch fix"]);
        let fix = run_git(&repo, &["rev-parse", "HEAD"]);
        run_git(&repo, &["checkout", "master"]);
        (root, first, second, fix)
    }

    #[tokio::test]
    async fn head_sha_returns_40_hex_chars() {
        let (root, _, second, _) = make_clone_root();
        let git = GitCli::system(root.path());
        let sha = git.head_sha("demo").await.unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert_eq!(sha, second);
    }

    #[tokio::test]
    async fn checkout_switches_branch() {
        let (root, _, _, fix) = make_clone_root();
        let git = GitCli::system(root.path());
        git.checkout("demo", "1.0").await.unwrap();
        assert_eq!(git.current_branch("demo").await.unwrap(), "1.0");
        assert_eq!(git.head_sha("demo").await.unwrap(), fix);
        git.checkout("demo", "master").await.unwrap();
        assert_eq!(git.current_branch("demo").await.unwrap(), "master");
    }

    #[tokio::test]
    async fn checkout_unknown_target_is_vcs_error() {
        let (root, _, _, _) = make_clone_root();
        let git = GitCli::system(root.path());
        let err = git.checkout("demo", "no-such-branch").await.unwrap_err();
        assert!(err.is_vcs());
    }

    #[tokio::test]
    async fn is_ancestor_distinguishes_history() {
        let (root, first, second, fix) = make_clone_root();
        let git = GitCli::system(root.path());
        assert!(git.is_ancestor("demo", &first, &second).await.unwrap());
        assert!(git.is_ancestor("demo", &first, &fix).await.unwrap());
        assert!(!git.is_ancestor("demo", &second, &fix).await.unwrap());
        assert!(!git.is_ancestor("demo", &fix, &first).await.unwrap());
    }

    #[tokio::test]
    async fn is_ancestor_fails_on_unknown_commit() {
        let (root, first, _, _) = make_clone_root();
        let git = GitCli::system(root.path());
        let bogus = "0123456789abcdef0123456789abcdef01234567";
        let err = git.is_ancestor("demo", bogus, &first).await.unwrap_err();
        assert!(err.is_vcs());
    }

    #[tokio::test]
    async fn add_and_commit_advance_head() {
        let (root, _, second, _) = make_clone_root();
        let git = GitCli::system(root.path());
        std::fs::write(root.path().join("demo").join("dependencies.json"), "{}\n").unwrap();
        git.add("demo", "dependencies.json").await.unwrap();
        git.commit("demo", "update dependencies").await.unwrap();
        let head = git.head_sha("demo").await.unwrap();
        assert_ne!(head, second);
        assert!(git.is_ancestor("demo", &second, &head).await.unwrap());
    }
}
