//! Windlass - deployment orchestration from one control node.
//!
//! This is the main entry point for the windlass CLI.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use windlass::cli::{Cli, Commands};
use windlass::config::Config;
use windlass::connection::{LocalTransport, Transport};
use windlass::recipes::{Deployment, TASKS};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // show_tasks needs no configuration or connections.
    if matches!(cli.command, Commands::ShowTasks) {
        print_tasks();
        std::process::exit(0);
    }

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("windlass: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    let transport = build_transport(cli.local);
    let deployment = match Deployment::new(config, transport) {
        Ok(deployment) => deployment,
        Err(e) => {
            eprintln!("windlass: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    let result = match cli.command {
        Commands::Setup => deployment.setup().await,
        Commands::UpdateCode => deployment.update_code().await,
        Commands::RollbackCode => deployment.rollback_code().await,
        Commands::Symlink => deployment.symlink().await,
        Commands::Restart => deployment.restart().await,
        Commands::Migrate { target } => deployment.migrate(target).await,
        Commands::Deploy => deployment.deploy().await,
        Commands::DeployWithMigrations => deployment.deploy_with_migrations().await,
        Commands::Rollback => deployment.rollback().await,
        Commands::DiffFromLastDeploy => match deployment.diff_from_last_deploy().await {
            Ok(diff) => {
                println!("\n{}\n", diff);
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::UpdateCurrent => deployment.update_current().await,
        Commands::Cleanup => deployment.cleanup().await,
        Commands::Spinner => deployment.spinner().await,
        Commands::ColdDeploy => deployment.cold_deploy().await,
        Commands::DisableWeb { reason, until } => deployment.disable_web(reason, until).await,
        Commands::EnableWeb => deployment.enable_web().await,
        Commands::ShowTasks => unreachable!("handled above"),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("windlass: {}", e);
            for failure in e.failed_hosts() {
                eprintln!("  {}", failure);
                if !failure.output.is_empty() {
                    for line in failure.output.lines() {
                        eprintln!("    {}", line);
                    }
                }
            }
            std::process::exit(e.exit_code());
        }
    }
}

/// Initialize logging based on verbosity level.
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}

#[cfg(feature = "russh")]
fn build_transport(local: bool) -> Arc<dyn Transport> {
    if local {
        Arc::new(LocalTransport::new())
    } else {
        Arc::new(windlass::connection::RusshTransport::new())
    }
}

#[cfg(not(feature = "russh"))]
fn build_transport(local: bool) -> Arc<dyn Transport> {
    if !local {
        eprintln!("windlass: built without SSH support, running locally");
    }
    Arc::new(LocalTransport::new())
}

fn print_tasks() {
    let longest = TASKS.iter().map(|(name, _)| name.len()).max().unwrap_or(0) + 2;
    println!("Available tasks");
    println!("---------------");
    for (name, desc) in TASKS {
        println!("{:<width$} {}", name, desc, width = longest);
    }
}
