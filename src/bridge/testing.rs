//! In-memory transport for bridge unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::protocol::{ChatMessage, Envelope};
use crate::transport::{PeerAddress, SendError, Transport};

/// Records every envelope handed to it. Sends to peers listed as unreachable
/// fail with [`SendError::Disconnected`].
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<(PeerAddress, Envelope)>>,
    unreachable: HashSet<PeerAddress>,
    fail_all: bool,
    attempts: AtomicUsize,
    notify: Notify,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            unreachable: HashSet::new(),
            fail_all: false,
            attempts: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new()
        }
    }

    pub(crate) fn unreachable<'a>(peers: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            unreachable: peers.into_iter().map(PeerAddress::from).collect(),
            ..Self::new()
        }
    }

    pub(crate) fn sent(&self) -> Vec<(PeerAddress, Envelope)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Chat messages sent so far, in order.
    pub(crate) fn sent_messages(&self) -> Vec<(PeerAddress, ChatMessage)> {
        self.sent()
            .into_iter()
            .filter_map(|(peer, envelope)| match envelope {
                Envelope::Message(msg) => Some((peer, msg)),
                Envelope::Acknowledgement(_) => None,
            })
            .collect()
    }

    /// Wait until at least `count` chat messages have been sent.
    pub(crate) async fn wait_for_messages(&self, count: usize) -> Vec<(PeerAddress, ChatMessage)> {
        loop {
            let notified = self.notify.notified();
            let messages = self.sent_messages();
            if messages.len() >= count {
                return messages;
            }
            notified.await;
        }
    }
}

impl Transport for RecordingTransport {
    fn send(&self, target: &PeerAddress, envelope: Envelope) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.unreachable.contains(target) {
            return Err(SendError::Disconnected(target.clone()));
        }
        self.sent.lock().unwrap().push((target.clone(), envelope));
        self.notify.notify_waiters();
        Ok(())
    }
}
