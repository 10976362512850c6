//! The standard deployment recipe.
//!
//! Canned tasks built on the core: directory setup, code update, symlink
//! swap, restart, migration, cleanup and the deploy macro-tasks. Each
//! task resolves its target hosts by role and fans commands out through
//! the dispatcher; the macro-tasks wrap their steps in a [`Transaction`]
//! so a failed deploy unwinds cleanly.
//!
//! Assumptions inherited from the recipe's origins: the `app` role runs
//! the application servers, `web` the web servers, `db` the databases
//! (exactly one marked primary), and spawner/reaper scripts manage the
//! application processes.

use std::sync::Arc;

use chrono::Utc;
use minijinja::{context, Environment};
use tracing::{debug, info};

use crate::config::{Config, DeployConfig, MigrateTarget};
use crate::connection::Transport;
use crate::dispatch::{Command, Dispatcher};
use crate::error::{Error, Result};
use crate::inventory::{Inventory, Role};
use crate::prompt::{PromptRule, PromptSet};
use crate::scm::{self, Scm, ScmContext};
use crate::transaction::{StepScope, Transaction};

/// Every named task with its description, for `show_tasks`.
pub const TASKS: &[(&str, &str)] = &[
    ("setup", "Set up the expected application directory structure on all boxes."),
    ("update_code", "Update all servers with the latest release of the source code."),
    ("rollback_code", "Rollback the latest checked-out version to the previous one."),
    ("symlink", "Update the 'current' symlink to the latest deployed version."),
    ("restart", "Restart the application servers."),
    ("migrate", "Run database migrations, on the primary database server only."),
    ("deploy", "Update the code, fix the symlink, and restart the application servers."),
    ("deploy_with_migrations", "Like deploy, but runs migrations against the new release first."),
    ("rollback", "Roll back the code and restart the application servers."),
    ("diff_from_last_deploy", "Display the diff between HEAD and what was last deployed."),
    ("update_current", "Update the released version directly via an SCM update."),
    ("cleanup", "Remove unused releases, keeping the most recent few."),
    ("spinner", "Start the spinner daemon for the application."),
    ("cold_deploy", "Deploy and then start the spinner (for when it isn't running yet)."),
    ("disable_web", "Put up a maintenance page on the web servers."),
    ("enable_web", "Take down the maintenance page."),
    ("show_tasks", "Enumerate and describe every available task."),
];

const MAINTENANCE_TEMPLATE: &str = include_str!("templates/maintenance.html.j2");

/// One deploy invocation: configuration, inventory, dispatcher, SCM
/// driver and the release name fixed at construction time.
pub struct Deployment {
    config: DeployConfig,
    inventory: Inventory,
    dispatcher: Dispatcher,
    scm: Arc<dyn Scm>,
    release_name: String,
}

impl Deployment {
    /// Builds a deployment from loaded configuration and a transport.
    ///
    /// The prompt rule set is assembled here: the SCM driver's rules
    /// first, then the sudo prompt rule, registered process-wide for the
    /// lifetime of the dispatcher.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let deploy = config.deploy;
        let inventory = Inventory::from_config(&config.roles)?;
        let scm = scm::driver_for(&deploy.scm)?;

        let mut rules = scm.prompt_rules(&deploy)?;
        rules.push(Self::sudo_rule(&deploy)?);
        let dispatcher = Dispatcher::new(transport, PromptSet::new(rules));

        Ok(Self {
            config: deploy,
            inventory,
            dispatcher,
            scm,
            release_name: Utc::now().format("%Y%m%d%H%M%S").to_string(),
        })
    }

    fn sudo_rule(config: &DeployConfig) -> Result<PromptRule> {
        let fallback = config.password.clone();
        PromptRule::new(r"\[sudo\] password for [^:\r\n]*:\s*$", move |host| {
            host.password.clone().or_else(|| fallback.clone())
        })
    }

    /// Overrides the generated release name. Mainly for tests.
    pub fn with_release_name(mut self, name: impl Into<String>) -> Self {
        self.release_name = name.into();
        self
    }

    /// The name of the release this invocation would create.
    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    fn release_path(&self) -> String {
        format!("{}/{}", self.config.releases_path(), self.release_name)
    }

    fn release_dir(&self, name: &str) -> String {
        format!("{}/{}", self.config.releases_path(), name)
    }

    // ========================================================================
    // Fan-out helpers
    // ========================================================================

    async fn run(&self, roles: &[Role], command: impl Into<String>) -> Result<()> {
        let hosts = self.inventory.resolve(roles);
        self.dispatcher
            .run(&hosts, &Command::run(command))
            .await
            .map(drop)
    }

    /// Runs via the configured run method (sudo unless disabled).
    async fn run_via(&self, roles: &[Role], command: impl Into<String>) -> Result<()> {
        let hosts = self.inventory.resolve(roles);
        let command = Command::via(self.config.run_method(), command);
        self.dispatcher.run(&hosts, &command).await.map(drop)
    }

    fn scm_context<'a>(
        &'a self,
        hosts: &'a [crate::inventory::Host],
        release_path: &'a str,
    ) -> ScmContext<'a> {
        ScmContext {
            dispatcher: &self.dispatcher,
            hosts,
            config: &self.config,
            release_path,
        }
    }

    /// Lists release directory names, sorted so the newest is last.
    ///
    /// Captured from one host; the releases root is assumed consistent
    /// across the fleet.
    pub async fn releases(&self) -> Result<Vec<String>> {
        let host = self
            .inventory
            .hosts()
            .first()
            .ok_or_else(|| Error::Config("no hosts defined in any role".into()))?;
        let output = self
            .dispatcher
            .capture(
                host,
                &Command::run(format!("ls -x {}", self.config.releases_path())),
            )
            .await?;
        let mut names: Vec<String> = output.split_whitespace().map(String::from).collect();
        names.sort();
        Ok(names)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Creates the releases root and shared log/system directories.
    pub async fn setup(&self) -> Result<()> {
        let releases = self.config.releases_path();
        let shared = self.config.shared_path();
        self.run(
            &Role::ALL,
            format!(
                "mkdir -p -m 775 {} {}/system && mkdir -p -m 777 {}/log",
                releases, shared, shared
            ),
        )
        .await
    }

    /// Checks out a new release; on rollback the release directory is
    /// removed again.
    pub async fn update_code(&self) -> Result<()> {
        let mut tx = Transaction::new();
        tx.step("update_code", |scope| self.update_code_step(scope))
            .await?;
        tx.commit();
        Ok(())
    }

    async fn update_code_step(&self, scope: Arc<StepScope>) -> Result<()> {
        let hosts = self.inventory.resolve(&Role::ALL);
        let release_path = self.release_path();

        scope.on_rollback({
            let dispatcher = self.dispatcher.clone();
            let hosts = hosts.clone();
            let path = release_path.clone();
            move || async move {
                dispatcher
                    .run(&hosts, &Command::run(format!("rm -rf {}", path)))
                    .await
                    .map(drop)
            }
        });

        let ctx = self.scm_context(&hosts, &release_path);
        self.scm.checkout(&ctx).await?;

        // Point the release's volatile directories at the shared ones.
        let shared = self.config.shared_path();
        self.dispatcher
            .run(
                &hosts,
                &Command::run(format!(
                    "rm -rf {rp}/log {rp}/public/system && \
                     ln -nfs {sp}/log {rp}/log && \
                     ln -nfs {sp}/system {rp}/public/system",
                    rp = release_path,
                    sp = shared
                )),
            )
            .await
            .map(drop)
    }

    /// Points `current` at the previous release and deletes the newest.
    pub async fn rollback_code(&self) -> Result<()> {
        let releases = self.releases().await?;
        if releases.len() < 2 {
            return Err(Error::NoPriorRelease);
        }
        let previous = self.release_dir(&releases[releases.len() - 2]);
        let newest = self.release_dir(&releases[releases.len() - 1]);
        self.run(
            &Role::ALL,
            format!(
                "ln -nfs {} {} && rm -rf {}",
                previous,
                self.config.current_path(),
                newest
            ),
        )
        .await
    }

    /// Points `current` at the latest release; on rollback it is pointed
    /// back at the previous one.
    pub async fn symlink(&self) -> Result<()> {
        let mut tx = Transaction::new();
        tx.step("symlink", |scope| self.symlink_step(scope)).await?;
        tx.commit();
        Ok(())
    }

    async fn symlink_step(&self, scope: Arc<StepScope>) -> Result<()> {
        let releases = self.releases().await?;
        let latest = releases
            .last()
            .ok_or_else(|| Error::Config("no releases to symlink".into()))?;
        let current_path = self.config.current_path();

        if releases.len() >= 2 {
            let previous = self.release_dir(&releases[releases.len() - 2]);
            scope.on_rollback({
                let dispatcher = self.dispatcher.clone();
                let hosts = self.inventory.resolve(&Role::ALL);
                let current_path = current_path.clone();
                move || async move {
                    dispatcher
                        .run(
                            &hosts,
                            &Command::run(format!("ln -nfs {} {}", previous, current_path)),
                        )
                        .await
                        .map(drop)
                }
            });
        } else {
            debug!("first release, nothing to re-point current at on rollback");
        }

        self.run(
            &Role::ALL,
            format!("ln -nfs {} {}", self.release_dir(latest), current_path),
        )
        .await
    }

    /// Restarts the application processes via the reaper script.
    pub async fn restart(&self) -> Result<()> {
        self.run_via(
            &[Role::App],
            format!("{}/script/process/reaper", self.config.current_path()),
        )
        .await
    }

    /// Runs database migrations on the primary database server.
    ///
    /// The target release is validated before any remote work: `current`
    /// runs under the `current` symlink, `latest` under the newest
    /// release directory.
    pub async fn migrate(&self, target: Option<MigrateTarget>) -> Result<()> {
        let target = target.unwrap_or(self.config.migrate_target);
        let hosts = self.inventory.resolve_where(&[Role::Db], |h| h.primary);
        if hosts.is_empty() {
            return Err(Error::Config(
                "migrate requires a database host marked primary".into(),
            ));
        }

        let directory = match target {
            MigrateTarget::Current => self.config.current_path(),
            MigrateTarget::Latest => {
                let releases = self.releases().await?;
                let latest = releases
                    .last()
                    .ok_or_else(|| Error::Config("no releases to migrate".into()))?;
                self.release_dir(latest)
            }
        };

        let mut command = format!(
            "cd {} && {} RAILS_ENV={}",
            directory, self.config.rake, self.config.rails_env
        );
        if !self.config.migrate_env.is_empty() {
            command.push(' ');
            command.push_str(&self.config.migrate_env);
        }
        command.push_str(" migrate");

        self.dispatcher
            .run(&hosts, &Command::run(command))
            .await
            .map(drop)
    }

    /// The deploy macro-task: transaction{update_code, symlink}, then
    /// restart.
    pub async fn deploy(&self) -> Result<()> {
        let mut tx = Transaction::new();
        tx.step("update_code", |scope| self.update_code_step(scope))
            .await?;
        tx.step("symlink", |scope| self.symlink_step(scope)).await?;
        tx.commit();

        self.restart().await
    }

    /// Deploy with migrations run against the new release before the
    /// symlink moves. Not transactional: migrations are not guaranteed to
    /// be reversible.
    pub async fn deploy_with_migrations(&self) -> Result<()> {
        self.update_code().await?;
        self.migrate(Some(MigrateTarget::Latest)).await?;
        self.symlink().await?;
        self.restart().await
    }

    /// Rolls the code back and restarts the application servers.
    pub async fn rollback(&self) -> Result<()> {
        self.rollback_code().await?;
        self.restart().await
    }

    /// The diff between HEAD and what was last deployed.
    pub async fn diff_from_last_deploy(&self) -> Result<String> {
        let hosts = self.inventory.resolve(&Role::ALL);
        let release_path = self.release_path();
        let ctx = self.scm_context(&hosts, &release_path);
        self.scm.diff(&ctx).await
    }

    /// Updates the released code in place via the SCM.
    pub async fn update_current(&self) -> Result<()> {
        let hosts = self.inventory.resolve(&Role::ALL);
        let release_path = self.release_path();
        let ctx = self.scm_context(&hosts, &release_path);
        self.scm.update(&ctx).await
    }

    /// Removes all but the newest `keep_releases` releases.
    pub async fn cleanup(&self) -> Result<()> {
        let releases = self.releases().await?;
        let keep = self.config.keep_releases;
        if keep >= releases.len() {
            info!("no old releases to clean up");
            return Ok(());
        }

        info!(
            keeping = keep,
            deployed = releases.len(),
            "cleaning up old releases"
        );
        let directories = releases[..releases.len() - keep]
            .iter()
            .map(|name| self.release_dir(name))
            .collect::<Vec<_>>()
            .join(" ");
        self.run_via(&Role::ALL, format!("rm -rf {}", directories))
            .await
    }

    /// Starts the spinner daemon on the application servers.
    pub async fn spinner(&self) -> Result<()> {
        let user = if self.config.use_sudo {
            format!("-u {} ", self.config.spinner_user)
        } else {
            String::new()
        };
        self.run_via(
            &[Role::App],
            format!("{}{}/script/spin", user, self.config.current_path()),
        )
        .await
    }

    /// Deploy for when the spinner isn't running: deploy, then start it.
    pub async fn cold_deploy(&self) -> Result<()> {
        self.deploy().await?;
        self.spinner().await
    }

    /// Puts up the maintenance page; rollback takes it down again.
    pub async fn disable_web(&self, reason: Option<String>, deadline: Option<String>) -> Result<()> {
        let mut tx = Transaction::new();
        tx.step("disable_web", |scope| {
            self.disable_web_step(scope, reason, deadline)
        })
        .await?;
        tx.commit();
        Ok(())
    }

    async fn disable_web_step(
        &self,
        scope: Arc<StepScope>,
        reason: Option<String>,
        deadline: Option<String>,
    ) -> Result<()> {
        let hosts = self.inventory.resolve(&[Role::Web]);
        let page = self.maintenance_page();

        scope.on_rollback({
            let dispatcher = self.dispatcher.clone();
            let hosts = hosts.clone();
            let page = page.clone();
            move || async move {
                dispatcher
                    .run(&hosts, &Command::run(format!("rm -f {}", page)))
                    .await
                    .map(drop)
            }
        });

        let html = render_maintenance(reason, deadline)?;
        self.dispatcher
            .put(&hosts, html.as_bytes(), &page, "644")
            .await
    }

    /// Takes the maintenance page down.
    pub async fn enable_web(&self) -> Result<()> {
        self.run(
            &[Role::Web],
            format!("rm -f {}", self.maintenance_page()),
        )
        .await
    }

    fn maintenance_page(&self) -> String {
        format!("{}/system/maintenance.html", self.config.shared_path())
    }
}

/// Renders the maintenance page shown while the web servers are disabled.
fn render_maintenance(reason: Option<String>, deadline: Option<String>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("maintenance", MAINTENANCE_TEMPLATE)?;
    let rendered = env.get_template("maintenance")?.render(context! {
        reason => reason.unwrap_or_else(|| "maintenance".to_string()),
        deadline => deadline.unwrap_or_else(|| "shortly".to_string()),
    })?;
    Ok(rendered)
}
