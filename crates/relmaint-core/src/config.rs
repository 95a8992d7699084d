//! Maintenance configuration.
//!
//! Loaded from an optional JSON file; every field has a default and a few
//! can be overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `RELMAINT_ROOT` | `root` |
//! | `RELMAINT_REGISTRY` | `registry_path` |
//! | `RELMAINT_BUILD_SERVER` | `build_server.url` |
//! | `RELMAINT_BUILD_TOKEN` | `build_server.token` |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{MaintenanceError, Result};
use crate::working_copy::{DEFAULT_BRANCH, MANIFEST_FILE};

pub const ENV_ROOT: &str = "RELMAINT_ROOT";
pub const ENV_REGISTRY: &str = "RELMAINT_REGISTRY";
pub const ENV_BUILD_SERVER: &str = "RELMAINT_BUILD_SERVER";
pub const ENV_BUILD_TOKEN: &str = "RELMAINT_BUILD_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceConfig {
    /// Directory holding every repository clone side by side.
    pub root: PathBuf,
    /// Branch every repo is restored to after a checkout-class operation.
    pub default_branch: String,
    /// Dependency manifest file name inside each repo.
    pub manifest_file: String,
    /// Persisted registry document.
    pub registry_path: PathBuf,
    pub build_server: BuildServerConfig,
    pub hosts: HostConfig,
    pub probes: ProbeConfig,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".."),
            default_branch: DEFAULT_BRANCH.to_string(),
            manifest_file: MANIFEST_FILE.to_string(),
            registry_path: PathBuf::from(".maintenance.json"),
            build_server: BuildServerConfig::default(),
            hosts: HostConfig::default(),
            probes: ProbeConfig::default(),
        }
    }
}

impl MaintenanceConfig {
    /// Parse a configuration file.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::NotFound`] when `path` does not exist.
    /// - [`MaintenanceError::Config`] when it is not a valid configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MaintenanceError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map_err(|e| MaintenanceError::Config(format!("{}: {e}", path.display())))
    }

    /// Load `path` if given (defaults otherwise), then apply the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(config.with_env())
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (keyed by the `RELMAINT_*` names).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup(ENV_ROOT) {
            self.root = PathBuf::from(root);
        }
        if let Some(registry) = lookup(ENV_REGISTRY) {
            self.registry_path = PathBuf::from(registry);
        }
        if let Some(url) = lookup(ENV_BUILD_SERVER) {
            self.build_server.url = url;
        }
        if let Some(token) = lookup(ENV_BUILD_TOKEN) {
            self.build_server.token = Some(token);
        }
        self
    }
}

/// Remote build queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildServerConfig {
    pub url: String,
    /// Authorization code sent with every build request.
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BuildServerConfig {
    fn default() -> Self {
        Self {
            url: "https://build-server.example.org".to_string(),
            token: None,
            timeout_secs: 60,
        }
    }
}

/// Hosts used when rendering deployed-version links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Release candidates of every brand.
    pub dev: String,
    /// Production `phet` brand.
    pub production: String,
    /// Production `phet-io` brand.
    pub phet_io: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            dev: "https://phet-dev.colorado.edu".to_string(),
            production: "https://phet.colorado.edu".to_string(),
            phet_io: "https://phet-io.colorado.edu".to_string(),
        }
    }
}

/// A behavior change introduced by `commit` in repo `dependency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureProbe {
    pub dependency: String,
    pub commit: String,
}

impl FeatureProbe {
    pub fn new(dependency: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            commit: commit.into(),
        }
    }
}

/// Feature commits used to tell legacy release branches apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Commit that replaced the `phet-io.standalone` query parameter.
    pub phetio_standalone: FeatureProbe,
    /// Commit that replaced the `relativeSimPath` wrapper parameter.
    pub relative_sim_path: FeatureProbe,
    /// Commit that introduced the chipper 2 build layout. When unset, the
    /// chipper `package.json` version at the pinned commit decides.
    pub chipper2: Option<FeatureProbe>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            phetio_standalone: FeatureProbe::new(
                "chipper",
                "4814d6966c54f250b1c0f3909b71f2b9cfcc7665",
            ),
            relative_sim_path: FeatureProbe::new(
                "phet-io",
                "e3fc26079358d86074358a6db3ebaf1af9725632",
            ),
            chipper2: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MaintenanceConfig::default();
        assert_eq!(config.default_branch, "master");
        assert_eq!(config.manifest_file, "dependencies.json");
        assert_eq!(config.registry_path, PathBuf::from(".maintenance.json"));
        assert!(config.build_server.token.is_none());
        assert!(config.probes.chipper2.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relmaint.json");
        std::fs::write(
            &path,
            r#"{ "root": "/clones", "build_server": { "url": "https://builds.test" } }"#,
        )
        .unwrap();

        let config = MaintenanceConfig::load(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/clones"));
        assert_eq!(config.build_server.url, "https://builds.test");
        assert_eq!(config.build_server.timeout_secs, 60);
        assert_eq!(config.default_branch, "master");
    }

    #[test]
    fn test_unknown_field_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relmaint.json");
        std::fs::write(&path, r#"{ "rooot": "/clones" }"#).unwrap();
        assert!(matches!(
            MaintenanceConfig::load(&path),
            Err(MaintenanceError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MaintenanceConfig::load(&dir.path().join("nope.json")),
            Err(MaintenanceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ROOT, "/srv/clones"),
            (ENV_BUILD_TOKEN, "secret"),
        ]);
        let config = MaintenanceConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.root, PathBuf::from("/srv/clones"));
        assert_eq!(config.build_server.token.as_deref(), Some("secret"));
        assert_eq!(config.registry_path, PathBuf::from(".maintenance.json"));
    }
}
