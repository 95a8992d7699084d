//! Domain model for release-branch maintenance.
//!
//! - `SimVersion`: parsed simulation versions
//! - `DependencyManifest`: per-repo dependency pins
//! - `Patch`: fix commits needed by release branches
//! - `ReleaseBranch` / `ModifiedBranch`: branches and the work queued on them

pub mod error;
pub mod manifest;
pub mod modified_branch;
pub mod patch;
pub mod release_branch;
pub mod version;

pub use error::{MaintenanceError, Result};
pub use manifest::{is_commit_sha, DependencyEntry, DependencyManifest};
pub use modified_branch::{ModifiedBranch, ModifiedBranchRecord};
pub use patch::Patch;
pub use release_branch::{ReleaseBranch, BRAND_PHET, BRAND_PHET_IO};
pub use version::{SimVersion, RELEASE_CANDIDATE};
