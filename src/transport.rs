//! Peer transport consumed by the bridge.
//!
//! The bridge only needs two things from a transport: a non-suspending
//! fire-and-forget `send`, and a callback for every inbound envelope. Neither
//! side knows about correlation; that lives entirely in [`crate::bridge`].
//!
//! # Components
//!
//! - `Transport` / `InboundHandler`: the two seams
//! - `ProcessTransport`: peers as child processes speaking framed envelopes on stdio
//! - `spawn_inbound_dispatcher`: delivers queued inbound envelopes to a handler

mod connection;
mod dispatch;
mod process;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::Envelope;

pub use connection::OUTBOUND_QUEUE_CAPACITY;
pub use dispatch::{DispatcherHandle, INBOUND_QUEUE_CAPACITY, Inbound, spawn_inbound_dispatcher};
pub use process::{PeerCommand, ProcessTransport};

/// Address of a peer as known to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for PeerAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Why an outbound envelope could not be handed to the transport.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerAddress),

    #[error("outbound queue full for peer {0}")]
    QueueFull(PeerAddress),

    #[error("peer {0} disconnected")]
    Disconnected(PeerAddress),

    #[error("failed to start peer {peer}: {source}")]
    Spawn {
        peer: PeerAddress,
        #[source]
        source: std::io::Error,
    },
}

/// Outbound half of a message transport.
///
/// `send` must not suspend: implementations queue the envelope and return.
/// Reply correlation is not the transport's concern.
pub trait Transport: Send + Sync {
    fn send(&self, target: &PeerAddress, envelope: Envelope) -> Result<(), SendError>;
}

/// Receiver of every inbound envelope, tagged with the address it came from.
pub trait InboundHandler: Send + Sync {
    fn on_inbound(&self, sender: PeerAddress, envelope: Envelope);
}
