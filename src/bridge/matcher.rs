//! Reply matcher: correlates inbound chat messages with pending waiters.
//!
//! A reply resolves a waiter only when it came from the peer that waiter sent
//! to. With a reply reference (`in_reply_to`) the match is by key; without
//! one, [`MatchPolicy`] decides whether the message is rejected or matched to
//! the oldest pending waiter for that sender. A reply is never handed to a
//! waiter that targeted a different peer.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::ack::AckResponder;
use super::pending::{PendingTable, Reply, WaiterView};
use crate::error::{BridgeError, BridgeOutcome};
use crate::protocol::{ChatMessage, Envelope};
use crate::transport::{InboundHandler, PeerAddress};

/// How to treat a chat message that carries no reply reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Drop it as malformed.
    #[default]
    Strict,
    /// Resolve the oldest pending waiter whose target is the sender.
    SenderScoped,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(MatchPolicy::Strict),
            "sender-scoped" => Ok(MatchPolicy::SenderScoped),
            other => Err(format!(
                "unknown match policy {:?} (expected \"strict\" or \"sender-scoped\")",
                other
            )),
        }
    }
}

/// Outcome of matching one inbound chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Resolved,
    /// Well-formed, but no pending waiter accepts it (unknown key, wrong
    /// sender, already resolved or timed out).
    Unmatched,
}

/// Consumes inbound envelopes, resolves waiters and acknowledges messages.
pub struct ReplyMatcher {
    table: Arc<PendingTable>,
    ack: AckResponder,
    policy: MatchPolicy,
}

impl ReplyMatcher {
    pub fn new(table: Arc<PendingTable>, ack: AckResponder, policy: MatchPolicy) -> Self {
        Self { table, ack, policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Match `message` from `sender` against the pending table.
    ///
    /// Does not acknowledge; see [`InboundHandler::on_inbound`].
    pub fn correlate(
        &self,
        sender: &PeerAddress,
        message: &ChatMessage,
    ) -> BridgeOutcome<MatchOutcome> {
        let reply = Reply {
            payload: message.text_content(),
            sender: sender.clone(),
        };
        let from_target = |view: &WaiterView<'_>| view.target == sender;

        let resolved = match (&message.in_reply_to, self.policy) {
            (Some(key), _) => self.table.try_resolve_key(key, from_target, reply),
            (None, MatchPolicy::SenderScoped) => self.table.try_resolve(from_target, reply),
            (None, MatchPolicy::Strict) => {
                return Err(BridgeError::malformed(sender, "missing in_reply_to"));
            }
        };

        if resolved {
            Ok(MatchOutcome::Resolved)
        } else {
            Ok(MatchOutcome::Unmatched)
        }
    }

    fn on_message(&self, sender: &PeerAddress, message: &ChatMessage) {
        match self.correlate(sender, message) {
            Ok(MatchOutcome::Resolved) => {
                info!(
                    target: "nakadachi::bridge::matcher",
                    "Matched reply {} from {}",
                    message.msg_id,
                    sender
                );
            }
            Ok(MatchOutcome::Unmatched) => {
                info!(
                    target: "nakadachi::bridge::matcher",
                    "Dropping reply {} from {}: no pending request {}",
                    message.msg_id,
                    sender,
                    message
                        .in_reply_to
                        .as_ref()
                        .map(|key| key.as_str())
                        .unwrap_or("for this sender")
                );
            }
            Err(e) => {
                warn!(
                    target: "nakadachi::bridge::matcher",
                    "Dropping message {}: {}",
                    message.msg_id,
                    e
                );
            }
        }

        self.ack.acknowledge(sender, &message.msg_id);
    }
}

impl InboundHandler for ReplyMatcher {
    fn on_inbound(&self, sender: PeerAddress, envelope: Envelope) {
        match envelope {
            Envelope::Message(message) => self.on_message(&sender, &message),
            Envelope::Acknowledgement(ack) => {
                debug!(
                    target: "nakadachi::bridge::matcher",
                    "Peer {} acknowledged {}",
                    sender,
                    ack.acknowledged_msg_id
                );
            }
        }
    }
}
