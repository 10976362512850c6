//! Fan-out command dispatch.
//!
//! The [`Dispatcher`] runs one shell command across a set of hosts: it
//! opens one channel per host, pumps every channel's output concurrently
//! (no host gates another), routes each chunk through the prompt matcher,
//! and aggregates per-host completion. Failures are collected, never
//! short-circuited: all in-flight channels run to a terminal state before
//! an aggregate error naming every failed host is raised.

use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::connection::{Channel, ChannelEvent, Transport};
use crate::error::{Error, HostFailure, Result};
use crate::inventory::Host;
use crate::prompt::PromptSet;

/// How a command is invoked on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMethod {
    /// Plain invocation as the login user
    Run,
    /// Privilege elevation via sudo
    Sudo,
}

/// An opaque shell string plus execution options.
///
/// Immutable; constructed by the calling layer (task body or SCM driver).
#[derive(Debug, Clone)]
pub struct Command {
    text: String,
    method: RunMethod,
}

impl Command {
    /// A plainly invoked command.
    pub fn run(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            method: RunMethod::Run,
        }
    }

    /// A sudo-elevated command.
    pub fn sudo(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            method: RunMethod::Sudo,
        }
    }

    /// A command invoked via the given method.
    pub fn via(method: RunMethod, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            method,
        }
    }

    /// The shell string actually handed to the transport.
    pub fn rendered(&self) -> String {
        match self.method {
            RunMethod::Run => self.text.clone(),
            RunMethod::Sudo => format!("sudo {}", self.text),
        }
    }
}

/// One host's completed execution.
#[derive(Debug, Clone)]
pub struct HostOutput {
    /// Host the command ran on
    pub host: String,
    /// Remote exit status; `None` when the stream ended without one
    pub exit_status: Option<i32>,
    /// Full accumulated output (both streams, arrival order)
    pub output: String,
}

impl HostOutput {
    fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }

    fn into_failure(self) -> HostFailure {
        HostFailure {
            host: self.host,
            exit_status: self.exit_status,
            output: self.output,
        }
    }
}

/// Runs commands across hosts and pumps their channels concurrently.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    prompts: Arc<PromptSet>,
}

impl Dispatcher {
    /// Creates a dispatcher over a transport with a process-wide prompt
    /// rule set.
    pub fn new(transport: Arc<dyn Transport>, prompts: PromptSet) -> Self {
        Self {
            transport,
            prompts: Arc::new(prompts),
        }
    }

    /// Runs `command` on every host concurrently.
    ///
    /// Waits for all channels to reach a terminal state. If any host
    /// exited non-zero or its connection errored, returns a fan-out
    /// failure naming every failed host; otherwise returns each host's
    /// output in input order.
    pub async fn run(&self, hosts: &[Host], command: &Command) -> Result<Vec<HostOutput>> {
        if hosts.is_empty() {
            return Ok(Vec::new());
        }
        let rendered = command.rendered();
        debug!(command = %rendered, hosts = hosts.len(), "dispatching command");

        let outputs = join_all(hosts.iter().map(|host| self.pump(host, &rendered))).await;

        let failures: Vec<HostFailure> = outputs
            .iter()
            .filter(|o| !o.succeeded())
            .cloned()
            .map(HostOutput::into_failure)
            .collect();

        if failures.is_empty() {
            Ok(outputs)
        } else {
            warn!(
                failed = failures.len(),
                total = hosts.len(),
                "command failed on some hosts"
            );
            Err(Error::Fanout { failures })
        }
    }

    /// Runs `command` on a single host and returns its raw output text,
    /// without raising on a non-zero exit.
    ///
    /// Used by callers that parse command output, such as SCM log
    /// inspection. Connection failures still raise.
    pub async fn capture(&self, host: &Host, command: &Command) -> Result<String> {
        let rendered = command.rendered();
        debug!(host = %host.name, command = %rendered, "capturing command output");

        let channel = self
            .transport
            .open(host, &rendered)
            .await
            .map_err(|e| Error::connection(&host.name, e.to_string()))?;
        let output = self.consume(host, channel).await;
        if !output.succeeded() {
            debug!(
                host = %output.host,
                status = ?output.exit_status,
                "captured command exited non-zero"
            );
        }
        Ok(output.output)
    }

    /// Uploads `data` to `path` on every host, then applies `mode`.
    ///
    /// Streams the bytes through each channel's standard input rather
    /// than requiring a file-transfer capability from the transport.
    pub async fn put(&self, hosts: &[Host], data: &[u8], path: &str, mode: &str) -> Result<()> {
        let command = format!("cat > {0} && chmod {1} {0}", path, mode);
        debug!(path = %path, hosts = hosts.len(), "uploading file contents");

        let outputs = join_all(hosts.iter().map(|host| async {
            let mut channel = match self.transport.open(host, &command).await {
                Ok(c) => c,
                Err(e) => {
                    return HostOutput {
                        host: host.name.clone(),
                        exit_status: None,
                        output: format!("connection failed: {}", e),
                    }
                }
            };
            if let Err(e) = channel.send(data).await {
                return HostOutput {
                    host: host.name.clone(),
                    exit_status: None,
                    output: format!("upload failed: {}", e),
                };
            }
            if let Err(e) = channel.send_eof().await {
                return HostOutput {
                    host: host.name.clone(),
                    exit_status: None,
                    output: format!("upload failed: {}", e),
                };
            }
            self.consume(host, channel).await
        }))
        .await;

        let failures: Vec<HostFailure> = outputs
            .into_iter()
            .filter(|o| !o.succeeded())
            .map(HostOutput::into_failure)
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Fanout { failures })
        }
    }

    /// Opens a channel to one host and pumps it to a terminal state.
    async fn pump(&self, host: &Host, rendered: &str) -> HostOutput {
        match self.transport.open(host, rendered).await {
            Ok(channel) => self.consume(host, channel).await,
            Err(e) => HostOutput {
                host: host.name.clone(),
                exit_status: None,
                output: format!("connection failed: {}", e),
            },
        }
    }

    /// Drains a channel, feeding output through the prompt matcher.
    ///
    /// The buffer is append-only; `scanned` marks how far prompt matching
    /// has consumed it, so a matched prompt never re-triggers.
    async fn consume(&self, host: &Host, mut channel: Box<dyn Channel>) -> HostOutput {
        let mut buffer = String::new();
        let mut scanned = 0;
        let mut exit_status = None;

        while let Some(event) = channel.recv().await {
            match event {
                ChannelEvent::Data { kind, bytes } => {
                    trace!(host = %host.name, kind = ?kind, len = bytes.len(), "chunk received");
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    if let Some(response) = self.prompts.match_tail(host, &buffer[scanned..]) {
                        debug!(host = %host.name, "answering interactive prompt");
                        if let Err(e) = channel.send(response.as_bytes()).await {
                            warn!(host = %host.name, error = %e, "failed to answer prompt");
                        }
                        scanned = buffer.len();
                    }
                }
                ChannelEvent::Exit { status } => {
                    exit_status = Some(status);
                }
            }
        }

        HostOutput {
            host: host.name.clone(),
            exit_status,
            output: buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_commands_are_prefixed() {
        assert_eq!(Command::run("ls /").rendered(), "ls /");
        assert_eq!(Command::sudo("rm -rf /tmp/x").rendered(), "sudo rm -rf /tmp/x");
        assert_eq!(
            Command::via(RunMethod::Sudo, "whoami").rendered(),
            "sudo whoami"
        );
    }
}
