//! Dependency manifests.
//!
//! Every repository records, in a manifest at its root, the branch and commit
//! of each repository it was built against:
//!
//! ```json
//! {
//!   "comment": "[date] ...",
//!   "chipper": { "branch": "master", "sha": "<40 hex>" },
//!   "demo":    { "branch": "1.2",    "sha": "<40 hex>" }
//! }
//! ```
//!
//! The `comment` key is not a dependency. It is skipped by all processing and
//! preserved verbatim (when it is a string) on rewrite.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::{MaintenanceError, Result};

/// Reserved manifest key that never names a repository.
pub const COMMENT_KEY: &str = "comment";

fn sha_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]{40}$").expect("sha pattern is valid"))
}

/// `true` for a full 40-character lowercase hex commit identifier.
pub fn is_commit_sha(sha: &str) -> bool {
    sha_regex().is_match(sha)
}

/// Where one dependency was pinned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub branch: String,
    pub sha: String,
}

/// Repository name to pinned branch/commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyManifest {
    entries: BTreeMap<String, DependencyEntry>,
    comment: Option<String>,
}

impl DependencyManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse manifest JSON text.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::Parse`] for invalid JSON, a non-object document,
    ///   an entry without `branch`/`sha`, or a malformed `sha`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| MaintenanceError::Parse(format!("dependency manifest: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(MaintenanceError::Parse(
                "dependency manifest must be a JSON object".to_string(),
            ));
        };

        let mut manifest = Self::new();
        for (repo, value) in map {
            if repo == COMMENT_KEY {
                if let Value::String(comment) = value {
                    manifest.comment = Some(comment);
                }
                continue;
            }
            let entry: DependencyEntry = serde_json::from_value(value).map_err(|e| {
                MaintenanceError::Parse(format!("dependency manifest entry {repo:?}: {e}"))
            })?;
            if !is_commit_sha(&entry.sha) {
                return Err(MaintenanceError::Parse(format!(
                    "dependency manifest entry {repo:?} has invalid sha {:?}",
                    entry.sha
                )));
            }
            manifest.entries.insert(repo, entry);
        }
        Ok(manifest)
    }

    /// Read the manifest file at `path`.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::NotFound`] when the file does not exist.
    /// - [`MaintenanceError::Parse`] when it is malformed.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MaintenanceError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_json_str(&text)
    }

    /// Write the manifest as pretty JSON with keys sorted.
    pub async fn write(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_json_string()).await?;
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(comment) = &self.comment {
            map.insert(COMMENT_KEY.to_string(), Value::String(comment.clone()));
        }
        for (repo, entry) in &self.entries {
            map.insert(
                repo.clone(),
                serde_json::json!({ "branch": entry.branch, "sha": entry.sha }),
            );
        }
        Value::Object(map)
    }

    pub fn to_json_string(&self) -> String {
        let mut text = serde_json::to_string_pretty(&self.to_value())
            .unwrap_or_else(|_| "{}".to_string());
        text.push('\n');
        text
    }

    pub fn get(&self, repo: &str) -> Option<&DependencyEntry> {
        self.entries.get(repo)
    }

    pub fn sha(&self, repo: &str) -> Option<&str> {
        self.entries.get(repo).map(|entry| entry.sha.as_str())
    }

    /// Pin `repo`. The comment key is refused.
    pub fn set(
        &mut self,
        repo: impl Into<String>,
        branch: impl Into<String>,
        sha: impl Into<String>,
    ) -> Result<()> {
        let repo = repo.into();
        let sha = sha.into();
        if repo == COMMENT_KEY {
            return Err(MaintenanceError::Parse(
                "\"comment\" is not a repository name".to_string(),
            ));
        }
        if !is_commit_sha(&sha) {
            return Err(MaintenanceError::Parse(format!(
                "invalid sha {sha:?} for {repo}"
            )));
        }
        self.entries.insert(
            repo,
            DependencyEntry {
                branch: branch.into(),
                sha,
            },
        );
        Ok(())
    }

    /// Layer pending `repo -> sha` overrides on top of this manifest.
    ///
    /// Existing entries keep their branch and take the new sha; repos not yet
    /// listed are added on `fallback_branch`.
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, String>,
        fallback_branch: &str,
    ) -> Result<()> {
        for (repo, sha) in overrides {
            let branch = self
                .entries
                .get(repo)
                .map(|entry| entry.branch.clone())
                .unwrap_or_else(|| fallback_branch.to_string());
            self.set(repo.clone(), branch, sha.clone())?;
        }
        Ok(())
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DependencyEntry)> {
        self.entries.iter().map(|(repo, entry)| (repo.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha(c: char) -> String {
        std::iter::repeat(c).take(40).collect()
    }

    #[test]
    fn test_parse_skips_comment() {
        let text = format!(
            r#"{{
                "comment": "[2024-01-01] deps for 1.2",
                "chipper": {{ "branch": "master", "sha": "{}" }},
                "demo": {{ "branch": "1.2", "sha": "{}" }}
            }}"#,
            sha('a'),
            sha('b')
        );
        let manifest = DependencyManifest::from_json_str(&text).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.sha("chipper"), Some(sha('a').as_str()));
        assert_eq!(manifest.get("demo").unwrap().branch, "1.2");
        assert_eq!(manifest.comment(), Some("[2024-01-01] deps for 1.2"));
        assert!(manifest.get(COMMENT_KEY).is_none());
    }

    #[test]
    fn test_parse_ignores_non_string_comment() {
        let text = format!(
            r#"{{ "comment": {{ "note": 1 }}, "demo": {{ "branch": "1.2", "sha": "{}" }} }}"#,
            sha('c')
        );
        let manifest = DependencyManifest::from_json_str(&text).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.comment(), None);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let text = r#"{ "demo": { "branch": "1.2" } }"#;
        assert!(matches!(
            DependencyManifest::from_json_str(text),
            Err(MaintenanceError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_sha() {
        let non_hex = sha('g');
        for bad in ["abc", "ABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD", non_hex.as_str()] {
            let text = format!(r#"{{ "demo": {{ "branch": "1.2", "sha": "{bad}" }} }}"#);
            assert!(
                matches!(
                    DependencyManifest::from_json_str(&text),
                    Err(MaintenanceError::Parse(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(DependencyManifest::from_json_str("[]").is_err());
        assert!(DependencyManifest::from_json_str("not json").is_err());
    }

    #[test]
    fn test_apply_overrides_keeps_branch_and_adds_missing() {
        let mut manifest = DependencyManifest::new();
        manifest.set("chipper", "master", sha('a')).unwrap();

        let overrides = BTreeMap::from([
            ("chipper".to_string(), sha('b')),
            ("joist".to_string(), sha('c')),
        ]);
        manifest.apply_overrides(&overrides, "demo-1.2").unwrap();

        assert_eq!(
            manifest.get("chipper"),
            Some(&DependencyEntry {
                branch: "master".to_string(),
                sha: sha('b')
            })
        );
        assert_eq!(manifest.get("joist").unwrap().branch, "demo-1.2");
        assert_eq!(manifest.sha("joist"), Some(sha('c').as_str()));
    }

    #[test]
    fn test_set_refuses_comment_key() {
        let mut manifest = DependencyManifest::new();
        assert!(manifest.set(COMMENT_KEY, "master", sha('a')).is_err());
    }

    #[tokio::test]
    async fn test_write_then_load_preserves_comment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dependencies.json");

        let mut manifest = DependencyManifest::new();
        manifest.set_comment("pinned for 1.2");
        manifest.set("demo", "1.2", sha('d')).unwrap();
        manifest.write(&path).await.unwrap();

        let loaded = DependencyManifest::load(&path).await.unwrap();
        assert_eq!(loaded, manifest);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = DependencyManifest::load(&dir.path().join("dependencies.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::NotFound { .. }));
    }
}
