//! SSH transport using the russh crate.
//!
//! Russh is a modern, async-native SSH library that integrates directly
//! with Tokio. One SSH session is opened per host per command; the exec
//! channel's messages map straight onto [`ChannelEvent`]s, and prompt
//! responses are written back with `channel.data`.

use async_trait::async_trait;
use russh::client::{Handle, Handler, Msg};
use russh::ChannelMsg;
use russh_keys::agent::client::AgentClient;
use russh_keys::key::PublicKey;
use russh_keys::load_secret_key;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{Channel, ChannelEvent, ConnectionError, ConnectionResult, StreamKind, Transport};
use crate::inventory::Host;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport opening one SSH session per command execution.
#[derive(Debug, Clone, Default)]
pub struct RusshTransport {
    /// Default login user when a host does not name one
    pub default_user: Option<String>,
}

impl RusshTransport {
    /// Creates a transport with no default user (falls back to $USER).
    pub fn new() -> Self {
        Self::default()
    }

    fn user_for(&self, host: &Host) -> String {
        host.user
            .clone()
            .or_else(|| self.default_user.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }

    async fn connect(&self, host: &Host) -> ConnectionResult<Handle<ClientHandler>> {
        let config = Arc::new(russh::client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let addr = format!("{}:{}", host.name, host.port);
        let socket = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                ConnectionError::ConnectionFailed(format!("timed out connecting to {}", addr))
            })?
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("failed to connect to {}: {}", addr, e))
            })?;
        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("failed to set TCP_NODELAY: {}", e))
        })?;

        let handler = ClientHandler {
            host: host.name.clone(),
        };
        let mut session = russh::client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("SSH handshake failed: {}", e))
            })?;

        let user = self.user_for(host);
        authenticate(&mut session, &user, host).await?;
        debug!(host = %host.name, user = %user, "SSH connection established");
        Ok(session)
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open(&self, host: &Host, command: &str) -> ConnectionResult<Box<dyn Channel>> {
        let session = self.connect(host).await?;
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ConnectionError::SshError(format!("failed to open channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ConnectionError::ExecutionFailed(format!("exec failed: {}", e)))?;
        trace!(host = %host.name, command = %command, "exec channel opened");

        Ok(Box::new(RusshChannel {
            channel,
            _session: session,
        }))
    }
}

/// Authentication fallback chain: agent, then default identity files,
/// then the host's password.
async fn authenticate(
    session: &mut Handle<ClientHandler>,
    user: &str,
    host: &Host,
) -> ConnectionResult<()> {
    if try_agent_auth(session, user).await {
        debug!("authenticated using SSH agent");
        return Ok(());
    }

    for key_path in default_identity_files() {
        if !key_path.exists() {
            continue;
        }
        let key_pair = match load_secret_key(&key_path, None) {
            Ok(key) => key,
            Err(e) => {
                trace!(key = %key_path.display(), error = %e, "failed to load key");
                continue;
            }
        };
        match session.authenticate_publickey(user, Arc::new(key_pair)).await {
            Ok(true) => {
                debug!(key = %key_path.display(), "authenticated using key");
                return Ok(());
            }
            Ok(false) => trace!(key = %key_path.display(), "key rejected"),
            Err(e) => trace!(key = %key_path.display(), error = %e, "key auth failed"),
        }
    }

    if let Some(password) = &host.password {
        let authenticated = session
            .authenticate_password(user, password)
            .await
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "password authentication failed: {}",
                    e
                ))
            })?;
        if authenticated {
            debug!("authenticated using password");
            return Ok(());
        }
    }

    Err(ConnectionError::AuthenticationFailed(
        "all authentication methods failed".to_string(),
    ))
}

async fn try_agent_auth(session: &mut Handle<ClientHandler>, user: &str) -> bool {
    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(e) => {
            trace!(error = %e, "no SSH agent available");
            return false;
        }
    };
    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            trace!(error = %e, "failed to list agent identities");
            return false;
        }
    };

    for identity in identities {
        let (returned_agent, result) = session
            .authenticate_future(user, identity.clone(), agent)
            .await;
        agent = returned_agent;
        match result {
            Ok(true) => return true,
            Ok(false) => trace!("agent identity rejected"),
            Err(e) => trace!(error = %e, "agent authentication attempt failed"),
        }
    }
    false
}

fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME") else {
        return Vec::new();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .collect()
}

/// Client handler accepting unknown host keys, matching
/// `StrictHostKeyChecking=accept-new` behavior.
struct ClientHandler {
    host: String,
}

#[derive(Debug)]
struct HandlerError(russh::Error);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "russh error: {}", self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<russh::Error> for HandlerError {
    fn from(err: russh::Error) -> Self {
        HandlerError(err)
    }
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = HandlerError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!(host = %self.host, "accepting server host key without verification");
        Ok(true)
    }
}

struct RusshChannel {
    channel: russh::Channel<Msg>,
    // Keeps the session alive for the lifetime of the channel.
    _session: Handle<ClientHandler>,
}

#[async_trait]
impl Channel for RusshChannel {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.channel.wait().await? {
                ChannelMsg::Data { ref data } => {
                    return Some(ChannelEvent::Data {
                        kind: StreamKind::Stdout,
                        bytes: data.to_vec(),
                    });
                }
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    return Some(ChannelEvent::Data {
                        kind: StreamKind::Stderr,
                        bytes: data.to_vec(),
                    });
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(ChannelEvent::Exit {
                        status: exit_status as i32,
                    });
                }
                // Eof/Close and other control messages carry no output.
                _ => continue,
            }
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> ConnectionResult<()> {
        let mut cursor = std::io::Cursor::new(bytes.to_vec());
        self.channel
            .data(&mut cursor)
            .await
            .map_err(|e| ConnectionError::SshError(format!("failed to send data: {}", e)))
    }

    async fn send_eof(&mut self) -> ConnectionResult<()> {
        self.channel
            .eof()
            .await
            .map_err(|e| ConnectionError::SshError(format!("failed to send EOF: {}", e)))
    }
}
