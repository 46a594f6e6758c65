//! Pending-request table.
//!
//! Tracks every in-flight forwarded request, keyed by the id of the outbound
//! message, and hands replies to their waiters via oneshot channels.
//!
//! The [`CorrelationBridge`](super::CorrelationBridge) registers a waiter
//! before it sends, the [`ReplyMatcher`](super::ReplyMatcher) resolves it, and
//! the bridge removes it once the call is over. A single mutex guards all
//! state, so resolving, expiring and removing are atomic with respect to each
//! other: no waiter is resolved twice, and none is removed mid-resolution.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{BridgeError, BridgeOutcome, LockResultExt};
use crate::protocol::MessageId;
use crate::transport::PeerAddress;

/// Lifecycle state of a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterStatus {
    Pending,
    Resolved,
    TimedOut,
}

/// The reply delivered to a resolved waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub payload: String,
    pub sender: PeerAddress,
}

/// Read-only view of a pending waiter, handed to match predicates.
#[derive(Debug, Clone, Copy)]
pub struct WaiterView<'a> {
    pub key: &'a MessageId,
    pub target: &'a PeerAddress,
    pub external_request_id: &'a str,
}

struct Waiter {
    target: PeerAddress,
    external_request_id: String,
    status: WaiterStatus,
    /// Registration order; lower is older.
    seq: u64,
    /// Taken exactly once, on the transition out of `Pending`.
    tx: Option<oneshot::Sender<Reply>>,
}

impl Waiter {
    fn view<'a>(&'a self, key: &'a MessageId) -> WaiterView<'a> {
        WaiterView {
            key,
            target: &self.target,
            external_request_id: &self.external_request_id,
        }
    }

    /// Pending -> Resolved. Returns false if the waiter already left `Pending`.
    fn resolve(&mut self, reply: Reply) -> bool {
        let Some(tx) = self.tx.take() else {
            return false;
        };
        self.status = WaiterStatus::Resolved;
        // The receiving call may have been dropped already; its guard removes
        // the entry, so there is nobody left to tell.
        let _ = tx.send(reply);
        true
    }
}

struct PendingState {
    waiters: HashMap<MessageId, Waiter>,
    next_seq: u64,
}

/// Registry of outstanding requests.
///
/// Owned by the process and shared by handle (`Arc`) between the bridge and
/// the matcher.
pub struct PendingTable {
    state: Mutex<PendingState>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PendingState {
                waiters: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Register a waiter for `key` and return the receiver its reply arrives on.
    ///
    /// Must happen before the outbound message is sent, so a fast reply always
    /// finds its waiter.
    pub fn register(
        &self,
        key: MessageId,
        target: PeerAddress,
        external_request_id: impl Into<String>,
    ) -> BridgeOutcome<oneshot::Receiver<Reply>> {
        let mut state = self.state.lock().recover_poison("PendingTable::register");

        if state.waiters.contains_key(&key) {
            return Err(BridgeError::DuplicateKey { key });
        }

        let (tx, rx) = oneshot::channel();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.waiters.insert(
            key,
            Waiter {
                target,
                external_request_id: external_request_id.into(),
                status: WaiterStatus::Pending,
                seq,
                tx: Some(tx),
            },
        );
        Ok(rx)
    }

    /// Resolve the oldest pending waiter that satisfies `predicate`.
    ///
    /// Returns `true` if a waiter was resolved.
    pub fn try_resolve<P>(&self, predicate: P, reply: Reply) -> bool
    where
        P: Fn(&WaiterView<'_>) -> bool,
    {
        let mut state = self.state.lock().recover_poison("PendingTable::try_resolve");

        let chosen = state
            .waiters
            .iter()
            .filter(|(_, waiter)| waiter.status == WaiterStatus::Pending)
            .filter(|(key, waiter)| predicate(&waiter.view(key)))
            .min_by_key(|(_, waiter)| waiter.seq)
            .map(|(key, _)| key.clone());

        let Some(key) = chosen else {
            return false;
        };
        match state.waiters.get_mut(&key) {
            Some(waiter) => waiter.resolve(reply),
            None => false,
        }
    }

    /// Resolve the waiter registered under `key`, if it is pending and
    /// satisfies `predicate`.
    pub fn try_resolve_key<P>(&self, key: &MessageId, predicate: P, reply: Reply) -> bool
    where
        P: Fn(&WaiterView<'_>) -> bool,
    {
        let mut state = self
            .state
            .lock()
            .recover_poison("PendingTable::try_resolve_key");

        match state.waiters.get_mut(key) {
            Some(waiter)
                if waiter.status == WaiterStatus::Pending && predicate(&waiter.view(key)) =>
            {
                waiter.resolve(reply)
            }
            _ => false,
        }
    }

    /// Pending -> TimedOut.
    ///
    /// Returns `false` if the waiter is absent or already resolved; in the
    /// latter case the reply is waiting in the receiver.
    pub fn expire(&self, key: &MessageId) -> bool {
        let mut state = self.state.lock().recover_poison("PendingTable::expire");

        match state.waiters.get_mut(key) {
            Some(waiter) if waiter.status == WaiterStatus::Pending => {
                waiter.status = WaiterStatus::TimedOut;
                waiter.tx = None;
                true
            }
            _ => false,
        }
    }

    /// Delete the entry for `key`. Idempotent.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove(&self, key: &MessageId) -> bool {
        let mut state = self.state.lock().recover_poison("PendingTable::remove");
        state.waiters.remove(key).is_some()
    }

    /// Current status of `key`, without changing it.
    pub fn snapshot_status(&self, key: &MessageId) -> Option<WaiterStatus> {
        let state = self
            .state
            .lock()
            .recover_poison("PendingTable::snapshot_status");
        state.waiters.get(key).map(|waiter| waiter.status)
    }

    /// Number of waiters still in `Pending`.
    pub fn pending_count(&self) -> usize {
        let state = self
            .state
            .lock()
            .recover_poison("PendingTable::pending_count");
        state
            .waiters
            .values()
            .filter(|waiter| waiter.status == WaiterStatus::Pending)
            .count()
    }

    /// Number of entries in any state.
    pub fn len(&self) -> usize {
        let state = self.state.lock().recover_poison("PendingTable::len");
        state.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
