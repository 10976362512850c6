//! Error types for windlass.
//!
//! This module defines the error types used throughout windlass, providing
//! rich error information for operators watching a deploy go sideways.

use thiserror::Error;

/// Result type alias for windlass operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A single host's command failure, as captured by the dispatcher.
///
/// `exit_status` is `None` when the connection itself failed or the
/// remote stream ended without reporting an exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    /// Host the command ran on
    pub host: String,
    /// Remote exit status, if the command got far enough to report one
    pub exit_status: Option<i32>,
    /// Output accumulated on the channel before it terminated
    pub output: String,
}

impl std::fmt::Display for HostFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_status {
            Some(status) => write!(f, "{}: exited with status {}", self.host, status),
            None => write!(f, "{}: connection terminated without exit status", self.host),
        }
    }
}

/// The main error type for windlass.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// One or more hosts failed during a multi-host dispatch.
    #[error("command failed on {} host(s): {}", failures.len(), format_failed_hosts(failures))]
    Fanout {
        /// Every host that failed, with its exit status and captured output
        failures: Vec<HostFailure>,
    },

    /// The transport could not open or keep a channel to a host.
    #[error("connection to '{host}' failed: {message}")]
    Connection {
        /// Target host
        host: String,
        /// Transport-level error message
        message: String,
    },

    // ========================================================================
    // Source Control Errors
    // ========================================================================
    /// The log-parsing upward search exhausted the path hierarchy.
    #[error("no revision found searching upward from '{path}'")]
    RevisionNotFound {
        /// Path the search started from
        path: String,
    },

    /// A driver does not implement the requested capability.
    #[error("the {scm} driver does not support '{operation}'")]
    Unsupported {
        /// Driver name
        scm: &'static str,
        /// Operation name
        operation: &'static str,
    },

    // ========================================================================
    // Deployment Errors
    // ========================================================================
    /// Rollback of code requires at least one prior release.
    #[error("could not rollback the code because there is no prior release")]
    NoPriorRelease,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("invalid value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Ambient Errors
    // ========================================================================
    /// Invalid prompt pattern.
    #[error("invalid prompt pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Template rendering error.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// TOML parsing error.
    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_failed_hosts(failures: &[HostFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Creates a connection error.
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration value error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Hosts that failed during a dispatch, if this is a fan-out failure.
    pub fn failed_hosts(&self) -> &[HostFailure] {
        match self {
            Error::Fanout { failures } => failures,
            _ => &[],
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Fanout { .. } => 2,
            Error::Connection { .. } => 3,
            Error::Config(_) | Error::InvalidConfig { .. } | Error::TomlParse(_) => 4,
            Error::RevisionNotFound { .. } => 5,
            Error::Unsupported { .. } => 6,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_names_every_failed_host() {
        let err = Error::Fanout {
            failures: vec![
                HostFailure {
                    host: "app1.example.com".into(),
                    exit_status: Some(1),
                    output: String::new(),
                },
                HostFailure {
                    host: "app2.example.com".into(),
                    exit_status: None,
                    output: String::new(),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("app1.example.com: exited with status 1"));
        assert!(message.contains("app2.example.com: connection terminated"));
        assert_eq!(err.failed_hosts().len(), 2);
    }

    #[test]
    fn exit_codes_distinguish_error_kinds() {
        assert_eq!(Error::Fanout { failures: vec![] }.exit_code(), 2);
        assert_eq!(Error::Config("missing repository".into()).exit_code(), 4);
        assert_eq!(
            Error::RevisionNotFound {
                path: "/repo".into()
            }
            .exit_code(),
            5
        );
    }
}
