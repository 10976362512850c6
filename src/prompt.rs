//! Interactive-prompt matching.
//!
//! Remote commands occasionally stop and ask for input, most commonly a
//! password. The dispatcher feeds each channel's accumulated output
//! through a [`PromptSet`]; when a registered rule matches the unmatched
//! tail of the buffer, the rule produces a response that is sent back on
//! exactly that channel.
//!
//! The rule set is process-wide, read-only configuration once execution
//! starts; matching state (how far the buffer has been consumed) lives
//! with each channel's pump, so channels never interfere.

use std::sync::Arc;

use regex::Regex;
use tracing::trace;

use crate::error::Result;
use crate::inventory::Host;

/// Produces the response for a matched prompt, or `None` when no secret
/// is configured for this host.
pub type Responder = Arc<dyn Fn(&Host) -> Option<String> + Send + Sync>;

/// A (pattern, response-source) pair.
#[derive(Clone)]
pub struct PromptRule {
    pattern: Regex,
    responder: Responder,
}

impl PromptRule {
    /// Creates a rule from a regex pattern and a response source.
    pub fn new<F>(pattern: &str, responder: F) -> Result<Self>
    where
        F: Fn(&Host) -> Option<String> + Send + Sync + 'static,
    {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            responder: Arc::new(responder),
        })
    }
}

impl std::fmt::Debug for PromptRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRule")
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// The registered prompt rules, consulted in registration order.
#[derive(Debug, Default)]
pub struct PromptSet {
    rules: Vec<PromptRule>,
}

impl PromptSet {
    /// Creates a prompt set from an ordered rule list.
    pub fn new(rules: Vec<PromptRule>) -> Self {
        Self { rules }
    }

    /// Appends a rule; later rules only fire when no earlier rule matches.
    pub fn push(&mut self, rule: PromptRule) {
        self.rules.push(rule);
    }

    /// Checks the unmatched tail of a channel's buffer against every rule
    /// in registration order. On the first match, returns the response to
    /// send, newline-terminated. The caller must then mark the matched
    /// region consumed so it never re-triggers.
    pub fn match_tail(&self, host: &Host, tail: &str) -> Option<String> {
        for rule in &self.rules {
            if rule.pattern.is_match(tail) {
                trace!(host = %host.name, pattern = %rule.pattern.as_str(), "prompt matched");
                return (rule.responder)(host).map(|secret| format!("{}\n", secret));
            }
        }
        None
    }

    /// Whether any rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
