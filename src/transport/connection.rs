//! Connection to a single peer process.
//!
//! Each connection runs two tasks:
//! - a single writer that drains the bounded outbound queue into the peer's stdin
//! - a reader that decodes envelopes from the peer's stdout and forwards them,
//!   tagged with the peer address, to the shared inbound queue
//!
//! Either task failing cancels the other, after which the connection reports
//! itself closed and the owning transport replaces it on the next send.

use std::process::Stdio;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatch::Inbound;
use super::process::PeerCommand;
use super::{PeerAddress, SendError};
use crate::protocol::{Envelope, FrameReader, FrameWriter};

/// Outbound queue capacity per peer.
///
/// Bounds memory per peer and provides backpressure: a full queue fails the
/// send with [`SendError::QueueFull`] instead of suspending the caller.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Handle to a running peer connection. Dropping it stops both tasks and
/// kills the peer process.
pub(crate) struct PeerConnection {
    address: PeerAddress,
    tx: mpsc::Sender<Envelope>,
    cancel_token: CancellationToken,
    _child: Option<Child>,
    _writer_handle: JoinHandle<()>,
    _reader_handle: JoinHandle<()>,
}

impl PeerConnection {
    /// Spawn the peer process and start its reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        address: PeerAddress,
        command: &PeerCommand,
        inbound: mpsc::Sender<Inbound>,
    ) -> std::io::Result<Self> {
        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture peer stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture peer stdout"))?;

        info!(
            target: "nakadachi::transport",
            "Started peer {} ({})",
            address,
            command
        );

        let mut connection = Self::from_io(address, stdout, stdin, inbound);
        connection._child = Some(child);
        Ok(connection)
    }

    /// Run a connection over arbitrary byte streams.
    pub(crate) fn from_io<R, W>(
        address: PeerAddress,
        reader: R,
        writer: W,
        inbound: mpsc::Sender<Inbound>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

        let writer_handle = tokio::spawn(writer_loop(
            address.clone(),
            FrameWriter::new(writer),
            rx,
            cancel_token.clone(),
        ));
        let reader_handle = tokio::spawn(reader_loop(
            address.clone(),
            FrameReader::new(reader),
            inbound,
            cancel_token.clone(),
        ));

        Self {
            address,
            tx,
            cancel_token,
            _child: None,
            _writer_handle: writer_handle,
            _reader_handle: reader_handle,
        }
    }

    /// Queue an envelope for the writer task without suspending.
    pub(crate) fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Disconnected(self.address.clone()));
        }
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull(self.address.clone()),
            TrySendError::Closed(_) => SendError::Disconnected(self.address.clone()),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.tx.is_closed()
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn writer_loop<W: AsyncWrite + Unpin>(
    address: PeerAddress,
    mut writer: FrameWriter<W>,
    mut rx: mpsc::Receiver<Envelope>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "nakadachi::transport::writer",
                    "Writer for {} cancelled, shutting down",
                    address
                );
                return;
            }

            msg = rx.recv() => {
                let Some(envelope) = msg else {
                    debug!(
                        target: "nakadachi::transport::writer",
                        "Outbound queue for {} closed",
                        address
                    );
                    return;
                };
                if let Err(e) = writer.write_json(&envelope).await {
                    warn!(
                        target: "nakadachi::transport::writer",
                        "Write to {} failed: {}, closing connection",
                        address,
                        e
                    );
                    cancel_token.cancel();
                    return;
                }
            }
        }
    }
}

async fn reader_loop<R: AsyncRead + Unpin>(
    address: PeerAddress,
    mut reader: FrameReader<R>,
    inbound: mpsc::Sender<Inbound>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(
                    target: "nakadachi::transport::reader",
                    "Reader for {} cancelled, shutting down",
                    address
                );
                return;
            }

            result = reader.read_json::<Envelope>() => {
                match result {
                    Ok(Some(envelope)) => {
                        let inbound_msg = Inbound {
                            sender: address.clone(),
                            envelope,
                        };
                        if inbound.send(inbound_msg).await.is_err() {
                            debug!(
                                target: "nakadachi::transport::reader",
                                "Inbound dispatcher gone, stopping reader for {}",
                                address
                            );
                            cancel_token.cancel();
                            return;
                        }
                    }
                    Ok(None) => {
                        info!(
                            target: "nakadachi::transport::reader",
                            "Peer {} closed its output",
                            address
                        );
                        cancel_token.cancel();
                        return;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(
                            target: "nakadachi::transport::reader",
                            "Dropping undecodable frame from {}: {}",
                            address,
                            e
                        );
                    }
                    Err(e) => {
                        warn!(
                            target: "nakadachi::transport::reader",
                            "Read from {} failed: {}, closing connection",
                            address,
                            e
                        );
                        cancel_token.cancel();
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatMessage, MessageId};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn message(id: &str, text: &str) -> Envelope {
        Envelope::Message(ChatMessage::text(MessageId::from(id), text))
    }

    #[tokio::test]
    async fn queued_envelopes_reach_the_peer_stream() {
        let (bridge_side, peer_side) = tokio::io::duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);

        let conn = PeerConnection::from_io(
            PeerAddress::from("peer-a"),
            bridge_read,
            bridge_write,
            inbound_tx,
        );
        let sent = message("m-1", "ping");
        conn.send(sent.clone()).unwrap();

        let mut peer_reader = FrameReader::new(peer_side);
        let received: Envelope = peer_reader.read_json().await.unwrap().unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn inbound_envelopes_are_tagged_with_peer_address() {
        let (bridge_side, peer_side) = tokio::io::duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);

        let _conn = PeerConnection::from_io(
            PeerAddress::from("peer-b"),
            bridge_read,
            bridge_write,
            inbound_tx,
        );

        let mut peer_writer = FrameWriter::new(peer_side);
        peer_writer.write_json(&message("r-1", "pong")).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .expect("inbound should arrive")
            .expect("channel open");
        assert_eq!(inbound.sender, PeerAddress::from("peer-b"));
        let Envelope::Message(msg) = inbound.envelope else {
            panic!("expected message");
        };
        assert_eq!(msg.msg_id, MessageId::from("r-1"));
    }

    #[tokio::test]
    async fn garbage_frame_does_not_stop_the_reader() {
        let (bridge_side, mut peer_side) = tokio::io::duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);

        let conn = PeerConnection::from_io(
            PeerAddress::from("peer-c"),
            bridge_read,
            bridge_write,
            inbound_tx,
        );

        peer_side
            .write_all(b"Content-Length: 13\r\n\r\n{\"type\":\"?\"}\n")
            .await
            .unwrap();
        let mut peer_writer = FrameWriter::new(peer_side);
        peer_writer.write_json(&message("r-2", "ok")).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .expect("valid frame should still arrive")
            .expect("channel open");
        assert_eq!(inbound.sender, PeerAddress::from("peer-c"));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn peer_eof_closes_connection() {
        let (bridge_side, peer_side) = tokio::io::duplex(4096);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);

        let conn = PeerConnection::from_io(
            PeerAddress::from("peer-d"),
            bridge_read,
            bridge_write,
            inbound_tx,
        );
        drop(peer_side);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !conn.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection should close after EOF");

        let err = conn.send(message("m-2", "late")).unwrap_err();
        assert!(matches!(err, SendError::Disconnected(_)));
    }
}
