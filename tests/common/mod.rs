//! Shared test doubles.
//!
//! `MockTransport` stands in for the SSH layer: tests script the events
//! each opened channel replays, keyed by host and/or command substring,
//! and inspect the commands that were dispatched and the bytes sent back
//! on each channel.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use windlass::connection::{
    Channel, ChannelEvent, ConnectionResult, StreamKind, Transport,
};
use windlass::inventory::Host;

/// A chunk of standard output.
pub fn out(text: &str) -> ChannelEvent {
    ChannelEvent::Data {
        kind: StreamKind::Stdout,
        bytes: text.as_bytes().to_vec(),
    }
}

/// A chunk of diagnostic output.
#[allow(dead_code)]
pub fn err(text: &str) -> ChannelEvent {
    ChannelEvent::Data {
        kind: StreamKind::Stderr,
        bytes: text.as_bytes().to_vec(),
    }
}

/// A remote exit status.
pub fn exit(status: i32) -> ChannelEvent {
    ChannelEvent::Exit { status }
}

/// The Subversion log output used throughout the driver tests.
#[allow(dead_code)]
pub const LOG_MSG: &str = "\
------------------------------------------------------------------------
r1967 | minam | 2005-08-03 06:59:03 -0600 (Wed, 03 Aug 2005) | 2 lines

Initial commit of the new deploy utility

------------------------------------------------------------------------
";

struct Rule {
    host: Option<String>,
    command_contains: Option<String>,
    events: Vec<ChannelEvent>,
    once: bool,
}

#[derive(Default)]
struct Inner {
    rules: Vec<Rule>,
    commands: Vec<(String, String)>,
    sent: Vec<(String, String)>,
    eof: Vec<String>,
}

/// Scripted transport: channels replay configured events and record
/// everything sent back to them.
#[derive(Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn add_rule(&self, rule: Rule) {
        self.inner.lock().rules.push(rule);
    }

    /// Channels for commands containing `substr` replay `events`.
    pub fn when_command(&self, substr: &str, events: Vec<ChannelEvent>) {
        self.add_rule(Rule {
            host: None,
            command_contains: Some(substr.to_string()),
            events,
            once: false,
        });
    }

    /// Like [`when_command`](Self::when_command), consumed after one use.
    /// Multiple once-rules with the same substring fire in registration
    /// order.
    #[allow(dead_code)]
    pub fn when_command_once(&self, substr: &str, events: Vec<ChannelEvent>) {
        self.add_rule(Rule {
            host: None,
            command_contains: Some(substr.to_string()),
            events,
            once: true,
        });
    }

    /// Every channel opened to `host` replays `events`.
    #[allow(dead_code)]
    pub fn when_host(&self, host: &str, events: Vec<ChannelEvent>) {
        self.add_rule(Rule {
            host: Some(host.to_string()),
            command_contains: None,
            events,
            once: false,
        });
    }

    /// Channels to `host` for commands containing `substr` replay
    /// `events`.
    #[allow(dead_code)]
    pub fn when_host_command(&self, host: &str, substr: &str, events: Vec<ChannelEvent>) {
        self.add_rule(Rule {
            host: Some(host.to_string()),
            command_contains: Some(substr.to_string()),
            events,
            once: false,
        });
    }

    /// Every `(host, command)` pair dispatched, in open order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.inner.lock().commands.clone()
    }

    /// Commands dispatched to any host, deduplicated in order.
    #[allow(dead_code)]
    pub fn command_lines(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (_, command) in self.inner.lock().commands.iter() {
            if !seen.contains(command) {
                seen.push(command.clone());
            }
        }
        seen
    }

    /// Text sent back on channels opened to `host`.
    #[allow(dead_code)]
    pub fn sent_to(&self, host: &str) -> Vec<String> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Hosts that received an end-of-input signal.
    #[allow(dead_code)]
    pub fn eof_hosts(&self) -> Vec<String> {
        self.inner.lock().eof.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, host: &Host, command: &str) -> ConnectionResult<Box<dyn Channel>> {
        let mut inner = self.inner.lock();
        inner.commands.push((host.name.clone(), command.to_string()));

        let matched = inner.rules.iter().position(|rule| {
            rule.host.as_deref().map_or(true, |h| h == host.name)
                && rule
                    .command_contains
                    .as_deref()
                    .map_or(true, |s| command.contains(s))
        });
        let events = match matched {
            Some(idx) => {
                if inner.rules[idx].once {
                    inner.rules.remove(idx).events
                } else {
                    inner.rules[idx].events.clone()
                }
            }
            None => vec![exit(0)],
        };

        Ok(Box::new(MockChannel {
            host: host.name.clone(),
            events: events.into(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockChannel {
    host: String,
    events: VecDeque<ChannelEvent>,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.pop_front()
    }

    async fn send(&mut self, bytes: &[u8]) -> ConnectionResult<()> {
        self.inner
            .lock()
            .sent
            .push((self.host.clone(), String::from_utf8_lossy(bytes).to_string()));
        Ok(())
    }

    async fn send_eof(&mut self) -> ConnectionResult<()> {
        self.inner.lock().eof.push(self.host.clone());
        Ok(())
    }
}
