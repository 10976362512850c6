//! Transport layer for remote host communication.
//!
//! This module defines the seam between the dispatcher and whatever
//! actually carries bytes to a host. A [`Transport`] opens one
//! [`Channel`] per host per command; the channel yields a stream of
//! `(stream-kind, bytes)` events until the remote process exits, and
//! accepts bytes back for interactive prompts.
//!
//! Two transports are provided:
//!
//! - **Local** (always built): runs commands through `sh -c` on the
//!   control node, mainly for development and single-box deploys.
//! - **SSH** (`russh` feature, default): pure-Rust SSH via the `russh`
//!   crate.

/// Local execution transport.
pub mod local;

/// Pure Rust SSH transport using russh.
#[cfg(feature = "russh")]
pub mod russh;

use async_trait::async_trait;
use thiserror::Error;

use crate::inventory::Host;

pub use local::LocalTransport;
#[cfg(feature = "russh")]
pub use russh::RusshTransport;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the initial connection to the host.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected by the remote host.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The command could not be started (not a non-zero exit).
    #[error("command execution failed: {0}")]
    ExecutionFailed(String),

    /// The channel was closed before the operation completed.
    #[error("connection closed")]
    Closed,

    /// SSH-specific error from the underlying implementation.
    #[error("SSH error: {0}")]
    SshError(String),

    /// I/O error during transport operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Which remote stream a chunk of output arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Diagnostic (error) output
    Stderr,
}

/// One event on an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A chunk of remote output.
    Data {
        /// Stream the chunk arrived on
        kind: StreamKind,
        /// Raw bytes as received
        bytes: Vec<u8>,
    },
    /// The remote process exited.
    Exit {
        /// Remote exit status
        status: i32,
    },
}

/// One open remote connection executing a single command.
///
/// Exclusively owned by the dispatcher for the duration of that command.
/// Ordering is guaranteed within one channel's event stream; nothing is
/// guaranteed across channels.
#[async_trait]
pub trait Channel: Send {
    /// Receives the next event, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<ChannelEvent>;

    /// Sends bytes to the remote process's standard input.
    async fn send(&mut self, bytes: &[u8]) -> ConnectionResult<()>;

    /// Signals end-of-input to the remote process.
    async fn send_eof(&mut self) -> ConnectionResult<()>;
}

/// A transport that can open channels to hosts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a channel to `host` executing `command`, yielding events
    /// until the remote process exits.
    async fn open(&self, host: &Host, command: &str) -> ConnectionResult<Box<dyn Channel>>;
}
