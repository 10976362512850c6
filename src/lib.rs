//! # Windlass - Deployment Orchestration
//!
//! Windlass drives a fleet of remote hosts, grouped by functional role,
//! through a scripted sequence of shell operations (source checkout,
//! symlink swap, process restart), maintaining release history and
//! rolling back coherently when a step fails.
//!
//! ## Core Concepts
//!
//! - **Inventory**: hosts grouped into roles (`app`, `web`, `db`)
//! - **Dispatcher**: runs one command concurrently across many hosts,
//!   streaming each host's output through the prompt matcher
//! - **Prompt Matcher**: detects interactive prompts (password requests)
//!   in a channel's output and answers them in-stream
//! - **SCM Drivers**: pluggable checkout/update/diff/latest-revision
//!   capability per source-control system
//! - **Transactions**: ordered steps with reverse-order rollback on
//!   failure
//! - **Recipes**: the canned deploy tasks built on all of the above
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 CLI Interface                    │
//! │           (one subcommand per task)              │
//! └──────────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────────┐
//! │           Recipes + Transactions                 │
//! │   (ordered steps, rollback on failure)           │
//! └──────────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//! ┌─────────────────────┐  ┌─────────────────────────┐
//! │     SCM Driver      │  │      Role Resolver      │
//! │ (subversion, ...)   │  │   (inventory lookup)    │
//! └─────────────────────┘  └─────────────────────────┘
//!            │                        │
//!            └───────────┬────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────────┐
//! │         Dispatcher + Prompt Matcher              │
//! │  (concurrent fan-out, streaming interaction)     │
//! └──────────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────────┐
//! │        Transport (SSH via russh, local)          │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use windlass::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load("windlass.toml".as_ref())?;
//!     let deployment = Deployment::new(config, Arc::new(RusshTransport::new()))?;
//!     deployment.deploy().await
//! }
//! ```

#![warn(clippy::all)]

/// Command-line interface definition.
pub mod cli;

/// Deployment configuration loading and validation.
pub mod config;

/// Transport layer (SSH, local).
pub mod connection;

/// Concurrent command fan-out across hosts.
pub mod dispatch;

/// Error types.
pub mod error;

/// Hosts, roles, and role resolution.
pub mod inventory;

/// Interactive-prompt matching.
pub mod prompt;

/// The standard deployment recipe.
pub mod recipes;

/// Source-control driver abstraction.
pub mod scm;

/// Transactional step execution with rollback.
pub mod transaction;

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::config::{CheckoutMode, Config, DeployConfig, MigrateTarget};
    pub use crate::connection::{Channel, ChannelEvent, LocalTransport, StreamKind, Transport};
    #[cfg(feature = "russh")]
    pub use crate::connection::RusshTransport;
    pub use crate::dispatch::{Command, Dispatcher, HostOutput, RunMethod};
    pub use crate::error::{Error, HostFailure, Result};
    pub use crate::inventory::{Host, Inventory, Role};
    pub use crate::prompt::{PromptRule, PromptSet};
    pub use crate::recipes::Deployment;
    pub use crate::scm::{Revision, Scm, ScmContext};
    pub use crate::transaction::{StepScope, Transaction, TxState};
}
