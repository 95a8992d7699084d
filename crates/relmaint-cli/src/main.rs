//! relmaint - release-branch maintenance CLI
//!
//! ## Commands
//!
//! - `status`: List patches and modified branches
//! - `patch`: Create patches and manage their commits
//! - `need`: Mark a release branch as needing a patch
//! - `apply`: Record a patch commit landed for a branch
//! - `push`: Commit and push pending dependency changes
//! - `checkout`: Check out a branch with its dependencies
//! - `links`: Print checklist links for a deployed version
//! - `deploy-rc` / `deploy-production`: Queue builds
//! - `prune`: Drop branches with nothing left to do

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use relmaint_core::{
    HttpBuildTrigger, Maintenance, MaintenanceConfig, ReleaseBranch, SimVersion, BRAND_PHET,
};

#[derive(Parser)]
#[command(name = "relmaint")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Track patches and dependency updates for release branches", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (JSON)
    #[arg(short, long, global = true, env = "RELMAINT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the repository clones
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List patches and modified branches
    Status,

    /// Manage patches
    Patch {
        #[command(subcommand)]
        action: PatchAction,
    },

    /// Mark a release branch as needing a patch
    Need {
        /// Repository of the release branch
        repo: String,
        /// Release branch, e.g. 1.2
        branch: String,
        /// Repository of the patch
        patch: String,
        /// Brands the branch ships
        #[arg(long = "brand", default_values_t = [BRAND_PHET.to_string()])]
        brands: Vec<String>,
        /// The branch was never published to production
        #[arg(long)]
        unreleased: bool,
    },

    /// Record that a patch landed for a release branch
    Apply {
        repo: String,
        branch: String,
        patch: String,
        /// Commit of the patch repo to pin
        sha: String,
        /// Message for the push commit
        #[arg(short, long)]
        message: String,
    },

    /// Commit and push pending dependency changes
    Push {
        /// Repository (every pending branch when omitted)
        repo: Option<String>,
        branch: Option<String>,
    },

    /// Check out a branch with its dependencies
    Checkout {
        repo: String,
        branch: String,
        /// Skip `npm prune`/`npm update`
        #[arg(long)]
        no_npm: bool,
    },

    /// Print checklist links for the deployed version of a branch
    Links {
        repo: String,
        branch: String,
        /// Omit the pushed messages from the header line
        #[arg(long)]
        no_messages: bool,
    },

    /// Queue a release-candidate build
    DeployRc {
        repo: String,
        branch: String,
        /// Version to build, e.g. 1.2.3-rc.1
        version: String,
    },

    /// Queue a production build
    DeployProduction {
        repo: String,
        branch: String,
        /// Version to build, e.g. 1.2.3
        version: String,
    },

    /// Drop branches with nothing left to do
    Prune,
}

#[derive(Subcommand)]
enum PatchAction {
    /// Create a patch for a repository
    Create {
        repo: String,
        #[arg(short, long)]
        message: String,
    },
    /// Add a fix commit to a patch
    AddSha { repo: String, sha: String },
    /// Remove a fix commit from a patch
    RemoveSha { repo: String, sha: String },
    /// Stop tracking a patch
    Remove { repo: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    relmaint_core::init_tracing(cli.json, level);

    let mut config = MaintenanceConfig::resolve(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    let mut maintenance = Maintenance::open(config).context("Failed to load registry")?;

    match cli.command {
        Commands::Status => cmd_status(&maintenance),
        Commands::Patch { action } => cmd_patch(&mut maintenance, action),
        Commands::Need {
            repo,
            branch,
            patch,
            brands,
            unreleased,
        } => {
            let release_branch = ReleaseBranch::new(repo, branch, brands, !unreleased);
            cmd_need(&mut maintenance, release_branch, &patch)
        }
        Commands::Apply {
            repo,
            branch,
            patch,
            sha,
            message,
        } => {
            maintenance.apply_patch(&repo, &branch, &patch, &sha, &message)?;
            println!("Recorded {patch} at {sha} for {repo} {branch}");
            Ok(())
        }
        Commands::Push { repo, branch } => cmd_push(&mut maintenance, repo, branch).await,
        Commands::Checkout {
            repo,
            branch,
            no_npm,
        } => cmd_checkout(&maintenance, &repo, &branch, !no_npm).await,
        Commands::Links {
            repo,
            branch,
            no_messages,
        } => {
            for line in maintenance
                .deployed_links(&repo, &branch, !no_messages)
                .await?
            {
                println!("{line}");
            }
            Ok(())
        }
        Commands::DeployRc {
            repo,
            branch,
            version,
        } => cmd_deploy(&mut maintenance, &repo, &branch, &version, false).await,
        Commands::DeployProduction {
            repo,
            branch,
            version,
        } => cmd_deploy(&mut maintenance, &repo, &branch, &version, true).await,
        Commands::Prune => {
            let pruned = maintenance.prune()?;
            for key in &pruned {
                println!("Pruned {key}");
            }
            println!("{} branch(es) pruned", pruned.len());
            Ok(())
        }
    }
}

fn cmd_status(maintenance: &Maintenance) -> Result<()> {
    let lines = maintenance.status_lines();
    if lines.is_empty() {
        println!("Nothing under maintenance");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn cmd_patch(maintenance: &mut Maintenance, action: PatchAction) -> Result<()> {
    match action {
        PatchAction::Create { repo, message } => {
            maintenance.create_patch(&repo, &message)?;
            println!("Created patch for {repo}");
        }
        PatchAction::AddSha { repo, sha } => {
            if maintenance.add_patch_sha(&repo, &sha)? {
                println!("Added {sha} to {repo}");
            } else {
                println!("{sha} is already part of {repo}");
            }
        }
        PatchAction::RemoveSha { repo, sha } => {
            if !maintenance.remove_patch_sha(&repo, &sha)? {
                bail!("{sha} is not part of the patch for {repo}");
            }
            println!("Removed {sha} from {repo}");
        }
        PatchAction::Remove { repo } => {
            let patch = maintenance.remove_patch(&repo)?;
            println!("Removed patch {patch}");
        }
    }
    Ok(())
}

fn cmd_need(maintenance: &mut Maintenance, release_branch: ReleaseBranch, patch: &str) -> Result<()> {
    let name = release_branch.to_string();
    if maintenance.add_needed_patch(release_branch, patch)? {
        println!("{name} now needs {patch}");
    } else {
        println!("{name} already needs {patch}");
    }
    Ok(())
}

async fn cmd_push(
    maintenance: &mut Maintenance,
    repo: Option<String>,
    branch: Option<String>,
) -> Result<()> {
    match (repo, branch) {
        (Some(repo), Some(branch)) => {
            maintenance
                .push_branch(&repo, &branch)
                .await
                .with_context(|| format!("Failed to push {repo} {branch}"))?;
            println!("Pushed {repo} {branch}");
        }
        (None, None) => {
            let pushed = maintenance.push_all().await?;
            for key in &pushed {
                println!("Pushed {key}");
            }
            println!("{} branch(es) pushed", pushed.len());
        }
        _ => bail!("push takes both <repo> and <branch>, or neither"),
    }
    Ok(())
}

async fn cmd_checkout(maintenance: &Maintenance, repo: &str, branch: &str, npm: bool) -> Result<()> {
    let manifest = maintenance
        .checkout_branch(repo, branch, npm)
        .await
        .with_context(|| format!("Failed to check out {repo} {branch}"))?;
    for (dep, entry) in manifest.iter() {
        println!("{dep:<30} {} ({})", entry.sha, entry.branch);
    }
    info!(repos = manifest.len(), "checked out");
    Ok(())
}

async fn cmd_deploy(
    maintenance: &mut Maintenance,
    repo: &str,
    branch: &str,
    version: &str,
    production: bool,
) -> Result<()> {
    let version: SimVersion = version
        .parse()
        .with_context(|| format!("Invalid version {version}"))?;
    let trigger = HttpBuildTrigger::new(maintenance.config().build_server.clone())
        .context("Failed to create build server client")?;

    let deployed = if production {
        maintenance
            .deploy_production(repo, branch, version, &trigger)
            .await?
    } else {
        maintenance
            .deploy_release_candidate(repo, branch, version, &trigger)
            .await?
    };
    println!("Queued {repo} {deployed}");
    // A production deploy has already released the pushed messages.
    for line in maintenance.deployed_links(repo, branch, !production).await? {
        println!("{line}");
    }
    Ok(())
}
