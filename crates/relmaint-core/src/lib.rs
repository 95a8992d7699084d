//! relmaint core library
//!
//! Tracks patches that long-lived release branches need, pushes dependency
//! updates to those branches and checks out their dependency sets in a
//! shared working copy of side-by-side clones.

pub mod build_trigger;
pub mod config;
pub mod domain;
pub mod exec;
pub mod fakes;
pub mod git;
pub mod maintenance;
pub mod registry;
pub mod telemetry;
pub mod working_copy;

pub use build_trigger::{BuildAccepted, BuildRequest, BuildTrigger, HttpBuildTrigger, TargetServer};
pub use config::{BuildServerConfig, FeatureProbe, HostConfig, MaintenanceConfig, ProbeConfig};
pub use domain::{
    DependencyEntry, DependencyManifest, MaintenanceError, ModifiedBranch, Patch, ReleaseBranch,
    Result, SimVersion, BRAND_PHET, BRAND_PHET_IO,
};
pub use exec::{CommandRunner, ExecError, SystemRunner};
pub use git::{GitCli, Vcs};
pub use maintenance::Maintenance;
pub use registry::{BranchKey, BranchRegistry};
pub use telemetry::init_tracing;
pub use working_copy::{CheckoutSession, WorkingCopy};
