//! Release branch identity.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::domain::version::SimVersion;

pub const BRAND_PHET: &str = "phet";
pub const BRAND_PHET_IO: &str = "phet-io";

fn default_released() -> bool {
    true
}

/// A long-lived branch of one repository, cut for a `major.minor` line.
///
/// Immutable once constructed; shared between modified-branch entries via
/// `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReleaseBranch {
    repo: String,
    branch: String,
    brands: Vec<String>,
    /// `false` for branches cut but never published to production.
    #[serde(default = "default_released")]
    is_released: bool,
}

impl ReleaseBranch {
    pub fn new(
        repo: impl Into<String>,
        branch: impl Into<String>,
        brands: impl IntoIterator<Item = impl Into<String>>,
        is_released: bool,
    ) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            brands: brands.into_iter().map(Into::into).collect(),
            is_released,
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn brands(&self) -> &[String] {
        &self.brands
    }

    pub fn has_brand(&self, brand: &str) -> bool {
        self.brands.iter().any(|b| b == brand)
    }

    pub fn is_released(&self) -> bool {
        self.is_released
    }

    /// `major.minor.0` implied by the branch name.
    pub fn version(&self) -> Result<SimVersion> {
        SimVersion::from_branch(&self.branch)
    }

    /// Sort by repo, then by branch version (unparseable names last, by name).
    pub fn compare(&self, other: &ReleaseBranch) -> Ordering {
        self.repo.cmp(&other.repo).then_with(|| {
            match (self.version(), other.version()) {
                (Ok(a), Ok(b)) => a.compare_number(&b),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => self.branch.cmp(&other.branch),
            }
        })
    }
}

impl fmt::Display for ReleaseBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.repo, self.branch, self.brands.join(","))?;
        if !self.is_released {
            f.write_str(" (unreleased)")?;
        }
        Ok(())
    }
}
