//! In-memory fakes for the process, version-control and build seams
//! (testing only).
//!
//! [`MemoryVcs`] keeps branch heads in memory but writes configured files
//! into the real clone directories on checkout, so manifest reads and
//! writes go through the filesystem exactly as they do against `git`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::build_trigger::{BuildAccepted, BuildRequest, BuildTrigger};
use crate::domain::error::{MaintenanceError, Result};
use crate::domain::manifest::DependencyManifest;
use crate::exec::{CommandRunner, ExecError};
use crate::git::Vcs;
use crate::working_copy::MANIFEST_FILE;

fn injected(command: String, cwd: &Path) -> ExecError {
    ExecError::Failed {
        command,
        cwd: cwd.display().to_string(),
        code: Some(128),
        stdout: String::new(),
        stderr: "injected failure".to_string(),
    }
}

// ---------------------------------------------------------------------------
// MemoryVcs
// ---------------------------------------------------------------------------

/// A commit recorded by [`MemoryVcs`], with the staged files as committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub repo: String,
    /// Whatever `repo` had checked out when committing.
    pub head: Option<String>,
    pub message: String,
    pub files: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct VcsState {
    heads: HashMap<String, String>,
    files: HashMap<(String, String), Vec<(String, String)>>,
    ancestry: HashSet<(String, String, String)>,
    failing_checkouts: HashSet<(String, String)>,
    failing_ops: HashSet<(String, String)>,
    staged: HashMap<String, Vec<String>>,
    commits: Vec<RecordedCommit>,
    pushes: Vec<(String, String)>,
    calls: Vec<String>,
}

/// [`Vcs`] over an in-memory model of heads and history.
#[derive(Debug)]
pub struct MemoryVcs {
    root: PathBuf,
    state: Mutex<VcsState>,
}

impl MemoryVcs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            state: Mutex::new(VcsState::default()),
        }
    }

    /// Write `contents` to `<repo>/<file>` whenever `target` is checked out.
    pub fn set_file(&self, repo: &str, target: &str, file: &str, contents: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        let files = state
            .files
            .entry((repo.to_string(), target.to_string()))
            .or_default();
        files.retain(|(name, _)| name != file);
        files.push((file.to_string(), contents.into()));
    }

    /// Serve `manifest` as `<repo>/dependencies.json` at `target`.
    pub fn set_manifest(&self, repo: &str, target: &str, manifest: &DependencyManifest) {
        self.set_file(repo, target, MANIFEST_FILE, manifest.to_json_string());
    }

    /// Record that `ancestor` is reachable from `descendant` in `repo`.
    pub fn set_ancestor(&self, repo: &str, ancestor: &str, descendant: &str) {
        self.state.lock().unwrap().ancestry.insert((
            repo.to_string(),
            ancestor.to_string(),
            descendant.to_string(),
        ));
    }

    pub fn fail_checkout(&self, repo: &str, target: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_checkouts
            .insert((repo.to_string(), target.to_string()));
    }

    /// Make `operation` (`pull`, `push`, `add`, `commit`, `ancestor check`)
    /// fail for `repo`.
    pub fn fail_operation(&self, repo: &str, operation: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_ops
            .insert((repo.to_string(), operation.to_string()));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_checkouts.clear();
        state.failing_ops.clear();
    }

    pub fn head(&self, repo: &str) -> Option<String> {
        self.state.lock().unwrap().heads.get(repo).cloned()
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.state.lock().unwrap().commits.clone()
    }

    /// `(repo, remote_branch)` for every successful push.
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().pushes.clone()
    }

    /// Every call in order, e.g. `checkout demo 1.2`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn begin(&self, repo: &str, operation: &str, call: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        if state
            .failing_ops
            .contains(&(repo.to_string(), operation.to_string()))
        {
            return Err(MaintenanceError::vcs(
                repo,
                operation,
                injected(format!("git {call}"), &self.root.join(repo)),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Vcs for MemoryVcs {
    async fn checkout(&self, repo: &str, target: &str) -> Result<()> {
        let files = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("checkout {repo} {target}"));
            if state
                .failing_checkouts
                .contains(&(repo.to_string(), target.to_string()))
            {
                return Err(MaintenanceError::vcs(
                    repo,
                    "checkout",
                    injected(format!("git checkout {target}"), &self.root.join(repo)),
                ));
            }
            state.heads.insert(repo.to_string(), target.to_string());
            state
                .files
                .get(&(repo.to_string(), target.to_string()))
                .cloned()
                .unwrap_or_default()
        };

        let dir = self.root.join(repo);
        tokio::fs::create_dir_all(&dir).await?;
        for (name, contents) in files {
            tokio::fs::write(dir.join(name), contents).await?;
        }
        Ok(())
    }

    async fn pull(&self, repo: &str) -> Result<()> {
        self.begin(repo, "pull", format!("pull {repo}"))
    }

    async fn push(&self, repo: &str, remote_branch: &str) -> Result<()> {
        self.begin(repo, "push", format!("push {repo} {remote_branch}"))?;
        self.state
            .lock()
            .unwrap()
            .pushes
            .push((repo.to_string(), remote_branch.to_string()));
        Ok(())
    }

    async fn add(&self, repo: &str, file: &str) -> Result<()> {
        self.begin(repo, "add", format!("add {repo} {file}"))?;
        self.state
            .lock()
            .unwrap()
            .staged
            .entry(repo.to_string())
            .or_default()
            .push(file.to_string());
        Ok(())
    }

    async fn commit(&self, repo: &str, message: &str) -> Result<()> {
        self.begin(repo, "commit", format!("commit {repo}"))?;
        let staged = self
            .state
            .lock()
            .unwrap()
            .staged
            .remove(repo)
            .unwrap_or_default();
        let mut files = Vec::with_capacity(staged.len());
        for name in staged {
            let contents = tokio::fs::read_to_string(self.root.join(repo).join(&name)).await?;
            files.push((name, contents));
        }
        let mut state = self.state.lock().unwrap();
        let head = state.heads.get(repo).cloned();
        // Later checkouts of the same head see the committed contents.
        if let Some(head) = &head {
            let served = state
                .files
                .entry((repo.to_string(), head.clone()))
                .or_default();
            for (name, contents) in &files {
                served.retain(|(existing, _)| existing != name);
                served.push((name.clone(), contents.clone()));
            }
        }
        state.commits.push(RecordedCommit {
            repo: repo.to_string(),
            head,
            message: message.to_string(),
            files,
        });
        Ok(())
    }

    async fn is_ancestor(&self, repo: &str, ancestor: &str, descendant: &str) -> Result<bool> {
        self.begin(
            repo,
            "ancestor check",
            format!("is-ancestor {repo} {ancestor} {descendant}"),
        )?;
        let state = self.state.lock().unwrap();
        Ok(ancestor == descendant
            || state.ancestry.contains(&(
                repo.to_string(),
                ancestor.to_string(),
                descendant.to_string(),
            )))
    }

    async fn head_sha(&self, repo: &str) -> Result<String> {
        self.head(repo)
            .ok_or_else(|| MaintenanceError::Missing(format!("no head for {repo}")))
    }

    async fn current_branch(&self, repo: &str) -> Result<String> {
        self.head(repo)
            .ok_or_else(|| MaintenanceError::Missing(format!("no branch for {repo}")))
    }
}

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// [`CommandRunner`] that records command lines and succeeds with no output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingRunner {
    /// Fail any command whose line equals `command`, e.g. `npm update`.
    pub fn fail(&self, command: &str) {
        self.failing.lock().unwrap().insert(command.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> std::result::Result<String, ExecError> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.commands.lock().unwrap().push(line.clone());
        if self.failing.lock().unwrap().contains(&line) {
            return Err(injected(line, cwd));
        }
        Ok(String::new())
    }
}

// ---------------------------------------------------------------------------
// RecordingBuildTrigger
// ---------------------------------------------------------------------------

/// Outcome a [`RecordingBuildTrigger`] reports for the next requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TriggerOutcome {
    #[default]
    Accept,
    RejectAuthorization,
    RejectValidation,
}

/// [`BuildTrigger`] that records requests instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingBuildTrigger {
    requests: Mutex<Vec<BuildRequest>>,
    outcome: Mutex<TriggerOutcome>,
}

impl RecordingBuildTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outcome(&self, outcome: TriggerOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildTrigger for RecordingBuildTrigger {
    async fn trigger(&self, request: &BuildRequest) -> Result<BuildAccepted> {
        self.requests.lock().unwrap().push(request.clone());
        match *self.outcome.lock().unwrap() {
            TriggerOutcome::Accept => Ok(BuildAccepted::default()),
            TriggerOutcome::RejectAuthorization => Err(MaintenanceError::Authorization(
                "invalid authorization code".to_string(),
            )),
            TriggerOutcome::RejectValidation => Err(MaintenanceError::Validation(format!(
                "rejected build of {} {}",
                request.repo, request.version
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkout_writes_configured_files() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = MemoryVcs::new(dir.path());
        vcs.set_file("chipper", "1.0", "package.json", r#"{"version":"2.0.0"}"#);

        vcs.checkout("chipper", "1.0").await.unwrap();
        let text = std::fs::read_to_string(dir.path().join("chipper/package.json")).unwrap();
        assert!(text.contains("2.0.0"));
        assert_eq!(vcs.head("chipper").as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn commit_captures_staged_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = MemoryVcs::new(dir.path());
        vcs.checkout("demo", "1.2").await.unwrap();
        std::fs::write(dir.path().join("demo/notes.txt"), "hello").unwrap();

        vcs.add("demo", "notes.txt").await.unwrap();
        vcs.commit("demo", "add notes").await.unwrap();

        let commits = vcs.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].head.as_deref(), Some("1.2"));
        assert_eq!(commits[0].files, vec![("notes.txt".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn injected_failures_are_vcs_errors() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = MemoryVcs::new(dir.path());
        vcs.fail_operation("demo", "push");
        assert!(vcs.push("demo", "1.2").await.unwrap_err().is_vcs());
        assert!(vcs.pushes().is_empty());

        vcs.clear_failures();
        vcs.push("demo", "1.2").await.unwrap();
        assert_eq!(vcs.pushes(), vec![("demo".to_string(), "1.2".to_string())]);
    }

    #[tokio::test]
    async fn ancestry_is_reflexive_and_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = MemoryVcs::new(dir.path());
        vcs.set_ancestor("chipper", "aaa", "bbb");
        assert!(vcs.is_ancestor("chipper", "aaa", "bbb").await.unwrap());
        assert!(vcs.is_ancestor("chipper", "ccc", "ccc").await.unwrap());
        assert!(!vcs.is_ancestor("chipper", "bbb", "aaa").await.unwrap());
    }
}
