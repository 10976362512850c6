//! Subversion driver.
//!
//! Builds `svn` invocations and parses their output. The interesting
//! part is `latest_revision`: `svn log` output is not guaranteed to carry
//! a log-entry header at every directory level (a leaf directory created
//! without a direct commit has no history of its own), so the driver
//! walks the path hierarchy upward until a header appears.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::{Revision, Scm, ScmContext};
use crate::config::{CheckoutMode, DeployConfig};
use crate::dispatch::Command;
use crate::error::{Error, Result};
use crate::prompt::PromptRule;

/// A log-entry header: `r1967 | minam | 2005-08-03 ... | 2 lines`.
static LOG_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r(\d+)\s*\|").expect("log header pattern"));

/// `Revision: 1967` from `svn info` output.
static INFO_REVISION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Revision:\s*(\d+)").expect("info revision pattern"));

/// The Subversion source-control driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct Subversion;

impl Subversion {
    fn username_flag(config: &DeployConfig) -> String {
        match &config.scm_username {
            Some(user) => format!("--username {} ", user),
            None => String::new(),
        }
    }

    fn checkout_command(config: &DeployConfig, release_path: &str) -> String {
        let op = match config.checkout {
            CheckoutMode::Checkout => "co",
            CheckoutMode::Export => "export",
        };
        format!(
            "{} {} {}-q {} {}",
            config.scm_command,
            op,
            Self::username_flag(config),
            config.repository,
            release_path
        )
    }

    fn update_command(config: &DeployConfig) -> String {
        format!("{} up -q {}", config.scm_command, config.current_path())
    }

    fn log_command(config: &DeployConfig, path: &str) -> String {
        format!("{} log -q -rHEAD --limit 1 {}", config.scm_command, path)
    }

    /// Captures `svn log` output for one candidate path.
    async fn log(&self, ctx: &ScmContext<'_>, path: &str) -> Result<String> {
        let host = ctx.capture_host()?;
        ctx.dispatcher
            .capture(host, &Command::run(Self::log_command(ctx.config, path)))
            .await
    }

    fn parse_revision(output: &str) -> Option<Revision> {
        output
            .lines()
            .find_map(|line| LOG_HEADER.captures(line))
            .map(|caps| Revision(caps[1].to_string()))
    }

    /// One directory level up, or `None` when the path cannot shorten
    /// further (root reached, or the next cut would break a URL scheme).
    fn parent(path: &str) -> Option<String> {
        let trimmed = path.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        if idx == 0 {
            return None;
        }
        let parent = &trimmed[..idx];
        if parent.ends_with('/') || parent.ends_with(':') {
            return None;
        }
        Some(parent.to_string())
    }
}

#[async_trait]
impl Scm for Subversion {
    fn name(&self) -> &'static str {
        "subversion"
    }

    async fn checkout(&self, ctx: &ScmContext<'_>) -> Result<()> {
        let command = Self::checkout_command(ctx.config, ctx.release_path);
        info!(repository = %ctx.config.repository, "checking out source");
        ctx.dispatcher
            .run(ctx.hosts, &Command::run(command))
            .await
            .map(drop)
    }

    async fn update(&self, ctx: &ScmContext<'_>) -> Result<()> {
        let command = Self::update_command(ctx.config);
        info!(path = %ctx.config.current_path(), "updating working copy");
        ctx.dispatcher
            .run(ctx.hosts, &Command::run(command))
            .await
            .map(drop)
    }

    async fn diff(&self, ctx: &ScmContext<'_>) -> Result<String> {
        if ctx.config.checkout == CheckoutMode::Export {
            // An export carries no working-copy metadata to diff against.
            return Err(Error::Unsupported {
                scm: self.name(),
                operation: "diff",
            });
        }

        let host = ctx.capture_host()?;
        let info = ctx
            .dispatcher
            .capture(
                host,
                &Command::run(format!(
                    "{} info {}",
                    ctx.config.scm_command,
                    ctx.config.current_path()
                )),
            )
            .await?;
        let deployed = INFO_REVISION
            .captures(&info)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| Error::RevisionNotFound {
                path: ctx.config.current_path(),
            })?;

        ctx.dispatcher
            .capture(
                host,
                &Command::run(format!(
                    "{} diff -r{}:HEAD {}",
                    ctx.config.scm_command, deployed, ctx.config.repository
                )),
            )
            .await
    }

    async fn latest_revision(&self, ctx: &ScmContext<'_>) -> Result<Revision> {
        let mut path = ctx.config.repository.clone();
        loop {
            let output = self.log(ctx, &path).await?;
            if let Some(revision) = Self::parse_revision(&output) {
                debug!(path = %path, revision = %revision, "found latest revision");
                return Ok(revision);
            }
            // No log header at this level; try one directory up.
            match Self::parent(&path) {
                Some(parent) => {
                    debug!(path = %path, parent = %parent, "no revision header, searching upward");
                    path = parent;
                }
                None => {
                    return Err(Error::RevisionNotFound {
                        path: ctx.config.repository.clone(),
                    })
                }
            }
        }
    }

    fn prompt_rules(&self, config: &DeployConfig) -> Result<Vec<PromptRule>> {
        let scm_password = config.scm_password.clone();
        let fallback = config.password.clone();
        let respond = move |host: &crate::inventory::Host| {
            host.password
                .clone()
                .or_else(|| scm_password.clone())
                .or_else(|| fallback.clone())
        };

        // Covers "Password: " and "<username>'s password: ".
        let ssh_style = PromptRule::new(r"(?i)\bpassword:\s*$", respond.clone())?;
        // Covers the HTTP-auth "Password for (realm): " form.
        let http_style = PromptRule::new(r"(?i)\bpassword for \([^)]*\):\s*$", respond)?;
        Ok(vec![ssh_style, http_style])
    }
}
