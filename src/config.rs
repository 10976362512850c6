//! Deployment configuration.
//!
//! Everything a deploy needs to know is read from one TOML file: the
//! repository, the directory layout on the target hosts, SCM
//! credentials, privilege-elevation policy, and the role inventory.
//! Configuration is an explicit object passed by reference into every
//! task; there is no ambient lookup.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::dispatch::RunMethod;
use crate::error::{Error, Result};
use crate::inventory::RolesConfig;

/// Whether the SCM produces a working copy or a bare export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    /// `checkout`: working copy with SCM metadata (default)
    #[default]
    Checkout,
    /// `export`: bare tree without metadata
    Export,
}

/// Which release the migration task runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MigrateTarget {
    /// The release `current` points at (default)
    #[default]
    Current,
    /// The newest release in the releases directory
    Latest,
}

/// The `[deploy]` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Repository location (URL or path) handed to the SCM driver
    pub repository: String,

    /// Root of the deployed application on every host
    #[serde(default = "default_deploy_to")]
    pub deploy_to: String,

    /// SCM driver name
    #[serde(default = "default_scm")]
    pub scm: String,

    /// Path to the SCM executable
    #[serde(default = "default_scm_command")]
    pub scm_command: String,

    /// Explicit SCM username, passed on the command line when set
    #[serde(default)]
    pub scm_username: Option<String>,

    /// SCM-level secret, consulted after any host-specific secret
    #[serde(default)]
    pub scm_password: Option<String>,

    /// System-wide default secret, the last fallback for prompts
    #[serde(default)]
    pub password: Option<String>,

    /// Checkout-vs-export mode
    #[serde(default)]
    pub checkout: CheckoutMode,

    /// Whether maintenance commands run under sudo
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    /// Overrides the run method derived from `use_sudo`
    #[serde(default)]
    pub run_method: Option<RunMethod>,

    /// Releases retained by `cleanup`
    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,

    /// Release the migration task targets
    #[serde(default)]
    pub migrate_target: MigrateTarget,

    /// Extra environment assignments appended to the migration command
    #[serde(default)]
    pub migrate_env: String,

    /// Rake executable used for migrations
    #[serde(default = "default_rake")]
    pub rake: String,

    /// Application environment exported to migrations
    #[serde(default = "default_rails_env")]
    pub rails_env: String,

    /// User the spinner daemon runs as under sudo
    #[serde(default = "default_spinner_user")]
    pub spinner_user: String,

    /// Override for the releases root (default `{deploy_to}/releases`)
    #[serde(default)]
    pub releases_path: Option<String>,

    /// Override for the shared directory (default `{deploy_to}/shared`)
    #[serde(default)]
    pub shared_path: Option<String>,

    /// Override for the current symlink (default `{deploy_to}/current`)
    #[serde(default)]
    pub current_path: Option<String>,

    /// Unknown options land here instead of failing the parse; recipes
    /// and test doubles may look them up by name.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

fn default_deploy_to() -> String {
    "/u/apps/app".to_string()
}

fn default_scm() -> String {
    "subversion".to_string()
}

fn default_scm_command() -> String {
    "svn".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keep_releases() -> usize {
    5
}

fn default_rake() -> String {
    "rake".to_string()
}

fn default_rails_env() -> String {
    "production".to_string()
}

fn default_spinner_user() -> String {
    "app".to_string()
}

impl DeployConfig {
    /// The releases root directory.
    pub fn releases_path(&self) -> String {
        self.releases_path
            .clone()
            .unwrap_or_else(|| format!("{}/releases", self.deploy_to))
    }

    /// The shared directory surviving across releases.
    pub fn shared_path(&self) -> String {
        self.shared_path
            .clone()
            .unwrap_or_else(|| format!("{}/shared", self.deploy_to))
    }

    /// The `current` symbolic link.
    pub fn current_path(&self) -> String {
        self.current_path
            .clone()
            .unwrap_or_else(|| format!("{}/current", self.deploy_to))
    }

    /// The effective run method: the explicit override when set,
    /// otherwise derived from `use_sudo`.
    pub fn run_method(&self) -> RunMethod {
        self.run_method.unwrap_or(if self.use_sudo {
            RunMethod::Sudo
        } else {
            RunMethod::Run
        })
    }

    /// Looks up an unrecognized option by name.
    pub fn extra(&self, key: &str) -> Option<&toml::Value> {
        self.extra.get(key)
    }

    /// Validates option values that serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if self.repository.trim().is_empty() {
            return Err(Error::Config("repository must not be empty".into()));
        }
        if self.keep_releases == 0 {
            return Err(Error::invalid_config(
                "keep_releases",
                "must keep at least one release",
            ));
        }
        Ok(())
    }
}

/// The whole configuration file: deploy settings plus the role inventory.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Deploy settings
    pub deploy: DeployConfig,
    /// Role to host mapping
    #[serde(default)]
    pub roles: RolesConfig,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.deploy.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.deploy.validate()?;
        Ok(config)
    }
}
