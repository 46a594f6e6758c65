//! Acknowledgement responder.

use std::sync::Arc;

use log::{debug, warn};

use crate::protocol::{ChatAcknowledgement, Envelope, MessageId};
use crate::transport::{PeerAddress, Transport};

/// Sends a transport-level acknowledgement for every received chat message.
///
/// Best effort: one attempt, failures are logged and swallowed.
#[derive(Clone)]
pub struct AckResponder {
    transport: Arc<dyn Transport>,
}

impl AckResponder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Acknowledge `inbound_id` back to `sender`.
    ///
    /// Returns `true` if the acknowledgement was handed to the transport.
    pub fn acknowledge(&self, sender: &PeerAddress, inbound_id: &MessageId) -> bool {
        let ack = Envelope::Acknowledgement(ChatAcknowledgement::new(inbound_id.clone()));
        match self.transport.send(sender, ack) {
            Ok(()) => {
                debug!(
                    target: "nakadachi::bridge::ack",
                    "Acknowledged {} to {}",
                    inbound_id,
                    sender
                );
                true
            }
            Err(e) => {
                warn!(
                    target: "nakadachi::bridge::ack",
                    "Failed to acknowledge {} to {}: {}",
                    inbound_id,
                    sender,
                    e
                );
                false
            }
        }
    }
}
