//! Local transport.
//!
//! Executes commands through `sh -c` on the control node, streaming
//! stdout and stderr as channel events. Useful for development,
//! single-box deploys, and exercising the dispatcher without a network.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Channel, ChannelEvent, ConnectionError, ConnectionResult, StreamKind, Transport};
use crate::inventory::Host;

const READ_BUF: usize = 4096;

/// Transport that runs every command locally, regardless of the host's
/// address.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl LocalTransport {
    /// Creates a new local transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open(&self, host: &Host, command: &str) -> ConnectionResult<Box<dyn Channel>> {
        debug!(host = %host.name, command = %command, "spawning local command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ConnectionError::ExecutionFailed(format!("failed to spawn process: {}", e))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or(ConnectionError::Closed)?;
        let stderr = child.stderr.take().ok_or(ConnectionError::Closed)?;

        let (tx, rx) = mpsc::channel(64);

        let out_pump = tokio::spawn(pump_stream(stdout, StreamKind::Stdout, tx.clone()));
        let err_pump = tokio::spawn(pump_stream(stderr, StreamKind::Stderr, tx.clone()));

        // Exit is reported only after both output streams have drained,
        // so every chunk precedes the exit event.
        tokio::spawn(async move {
            let _ = out_pump.await;
            let _ = err_pump.await;
            match child.wait().await {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    trace!(status = code, "local command exited");
                    let _ = tx.send(ChannelEvent::Exit { status: code }).await;
                }
                Err(e) => {
                    debug!(error = %e, "failed to reap local command");
                }
            }
        });

        Ok(Box::new(LocalChannel { events: rx, stdin }))
    }
}

async fn pump_stream<R>(mut reader: R, kind: StreamKind, tx: mpsc::Sender<ChannelEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let event = ChannelEvent::Data {
                    kind,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

struct LocalChannel {
    events: mpsc::Receiver<ChannelEvent>,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl Channel for LocalChannel {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    async fn send(&mut self, bytes: &[u8]) -> ConnectionResult<()> {
        let stdin = self.stdin.as_mut().ok_or(ConnectionError::Closed)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn send_eof(&mut self) -> ConnectionResult<()> {
        // Dropping stdin closes the pipe.
        self.stdin.take().ok_or(ConnectionError::Closed)?;
        Ok(())
    }
}
