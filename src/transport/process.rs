//! Process-backed transport: every peer address maps to a configured command.
//!
//! Peers are started lazily on the first send to their address and restarted
//! on the next send after their connection closes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::connection::PeerConnection;
use super::dispatch::{INBOUND_QUEUE_CAPACITY, Inbound};
use super::{PeerAddress, SendError, Transport};
use crate::error::LockResultExt;
use crate::protocol::Envelope;

/// Command line used to start a peer: the program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCommand {
    pub command: Vec<String>,
}

impl PeerCommand {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    /// The program to execute. Empty for an empty command.
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or(&[])
    }
}

impl fmt::Display for PeerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command.join(" "))
    }
}

/// Transport that talks to peers as child processes over framed stdio.
pub struct ProcessTransport {
    commands: HashMap<PeerAddress, PeerCommand>,
    connections: Mutex<HashMap<PeerAddress, PeerConnection>>,
    inbound: mpsc::Sender<Inbound>,
}

impl ProcessTransport {
    /// Create a transport for the given peers.
    ///
    /// Returns the transport together with the receiving end of the inbound
    /// queue, to be handed to [`spawn_inbound_dispatcher`](super::spawn_inbound_dispatcher).
    pub fn new(commands: HashMap<PeerAddress, PeerCommand>) -> (Self, mpsc::Receiver<Inbound>) {
        let (inbound, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let transport = Self {
            commands,
            connections: Mutex::new(HashMap::new()),
            inbound,
        };
        (transport, rx)
    }

    /// Attach a peer over already-open byte streams instead of a process.
    ///
    /// Replaces any existing connection for `address`. Must be called from
    /// within a tokio runtime.
    pub fn attach<R, W>(&self, address: PeerAddress, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let connection =
            PeerConnection::from_io(address.clone(), reader, writer, self.inbound.clone());
        self.connections
            .lock()
            .recover_poison("ProcessTransport::attach")
            .insert(address, connection);
    }

    /// Whether `address` is either configured or attached.
    pub fn knows(&self, address: &PeerAddress) -> bool {
        self.commands.contains_key(address)
            || self
                .connections
                .lock()
                .recover_poison("ProcessTransport::knows")
                .contains_key(address)
    }

    /// Addresses of every configured peer, sorted.
    pub fn configured_peers(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<_> = self.commands.keys().cloned().collect();
        peers.sort();
        peers
    }
}

impl Transport for ProcessTransport {
    fn send(&self, target: &PeerAddress, envelope: Envelope) -> Result<(), SendError> {
        let mut connections = self
            .connections
            .lock()
            .recover_poison("ProcessTransport::send");

        if connections.get(target).is_some_and(PeerConnection::is_closed) {
            debug!(
                target: "nakadachi::transport",
                "Connection to {} is closed, discarding it",
                target
            );
            connections.remove(target);
        }

        if !connections.contains_key(target) {
            let Some(command) = self.commands.get(target) else {
                return Err(SendError::UnknownPeer(target.clone()));
            };
            let connection = PeerConnection::spawn(target.clone(), command, self.inbound.clone())
                .map_err(|source| {
                    warn!(
                        target: "nakadachi::transport",
                        "Failed to start peer {} ({}): {}",
                        target,
                        command,
                        source
                    );
                    SendError::Spawn {
                        peer: target.clone(),
                        source,
                    }
                })?;
            connections.insert(target.clone(), connection);
        }

        match connections.get(target) {
            Some(connection) => connection.send(envelope),
            None => Err(SendError::Disconnected(target.clone())),
        }
    }
}
