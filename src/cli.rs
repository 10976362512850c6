//! Command-line interface.
//!
//! Each subcommand corresponds one-to-one with a named deploy task. The
//! process exits non-zero when the task's transaction ends rolled back
//! or an error escapes, zero on success.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::MigrateTarget;

/// Deployment orchestration from one control node.
#[derive(Debug, Parser)]
#[command(name = "windlass", version, about, long_about = None)]
pub struct Cli {
    /// Path to the deploy configuration file
    #[arg(short, long, default_value = "windlass.toml", env = "WINDLASS_CONFIG")]
    pub config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Run every command locally instead of over SSH
    #[arg(long)]
    pub local: bool,

    /// Task to run
    #[command(subcommand)]
    pub command: Commands,
}

/// The named deploy tasks.
#[derive(Debug, Subcommand)]
#[command(rename_all = "snake_case")]
pub enum Commands {
    /// Set up the expected application directory structure on all boxes
    Setup,
    /// Update all servers with the latest release of the source code
    UpdateCode,
    /// Rollback the latest checked-out version to the previous one
    RollbackCode,
    /// Update the 'current' symlink to the latest deployed version
    Symlink,
    /// Restart the application servers
    Restart,
    /// Run database migrations on the primary database server
    Migrate {
        /// Release to migrate: the current symlink or the newest release
        #[arg(long, value_enum)]
        target: Option<MigrateTarget>,
    },
    /// Update the code, fix the symlink, and restart the app servers
    Deploy,
    /// Like deploy, but runs migrations against the new release first
    DeployWithMigrations,
    /// Roll back the code and restart the application servers
    Rollback,
    /// Display the diff between HEAD and what was last deployed
    DiffFromLastDeploy,
    /// Update the released version directly via an SCM update
    UpdateCurrent,
    /// Remove unused releases, keeping the most recent few
    Cleanup,
    /// Start the spinner daemon for the application
    Spinner,
    /// Deploy and then start the spinner
    ColdDeploy,
    /// Put up a maintenance page on the web servers
    DisableWeb {
        /// Why the system is down
        #[arg(long)]
        reason: Option<String>,
        /// When the system will be back
        #[arg(long)]
        until: Option<String>,
    },
    /// Take down the maintenance page
    EnableWeb,
    /// Enumerate and describe every available task
    ShowTasks,
}
