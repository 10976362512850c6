//! Source-control driver abstraction.
//!
//! Each driver implements the capability set {checkout, update, diff,
//! latest-revision} for one source-control system, building the
//! system-specific commands and parsing their output. A capability the
//! driver lacks reports [`Error::Unsupported`] instead of failing
//! silently.

/// Subversion driver.
pub mod subversion;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DeployConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::inventory::Host;
use crate::prompt::PromptRule;

pub use subversion::Subversion;

/// An opaque source-control version identifier.
///
/// No internal structure beyond string equality and display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(pub String);

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a driver operation needs: the dispatcher, the target host
/// set, configuration, and the destination path for new checkouts.
pub struct ScmContext<'a> {
    /// Dispatcher to fan commands out through
    pub dispatcher: &'a Dispatcher,
    /// Hosts the operation targets
    pub hosts: &'a [Host],
    /// Deploy configuration (repository, executable, credentials, mode)
    pub config: &'a DeployConfig,
    /// Destination path for a new checkout
    pub release_path: &'a str,
}

impl ScmContext<'_> {
    /// One host to run output-capturing commands on.
    pub fn capture_host(&self) -> Result<&Host> {
        self.hosts
            .first()
            .ok_or_else(|| Error::Config("no hosts available for this operation".into()))
    }
}

/// Polymorphic source-control capability, one implementation per backend.
#[async_trait]
pub trait Scm: Send + Sync {
    /// Driver name, used in error messages.
    fn name(&self) -> &'static str;

    /// Checks the configured repository out into the release path on
    /// every target host.
    async fn checkout(&self, ctx: &ScmContext<'_>) -> Result<()>;

    /// Updates the existing working copy in place.
    async fn update(&self, ctx: &ScmContext<'_>) -> Result<()>;

    /// The textual diff between the last deployed revision and the
    /// repository head.
    async fn diff(&self, ctx: &ScmContext<'_>) -> Result<String> {
        let _ = ctx;
        Err(Error::Unsupported {
            scm: self.name(),
            operation: "diff",
        })
    }

    /// The most recent revision of the configured repository.
    async fn latest_revision(&self, ctx: &ScmContext<'_>) -> Result<Revision>;

    /// The driver's interactive-prompt rules, with responses resolved
    /// from the given configuration.
    fn prompt_rules(&self, config: &DeployConfig) -> Result<Vec<PromptRule>>;
}

/// Selects a driver by its configured name.
pub fn driver_for(name: &str) -> Result<Arc<dyn Scm>> {
    match name {
        "subversion" | "svn" => Ok(Arc::new(Subversion)),
        other => Err(Error::invalid_config(
            "scm",
            format!("unknown source control driver '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_subversion_by_either_name() {
        assert!(driver_for("subversion").is_ok());
        assert!(driver_for("svn").is_ok());
        assert!(driver_for("pijul").is_err());
    }
}
