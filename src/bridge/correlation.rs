//! Correlation bridge: one synchronous call in, one async round trip out.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::BridgeResult;
use super::pending::{PendingTable, Reply};
use crate::error::{BridgeError, BridgeOutcome};
use crate::protocol::{ChatMessage, Envelope, MessageId};
use crate::transport::{PeerAddress, Transport};

/// Default time to wait for a reply, measured from the send.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Removes the waiter when the owning call ends, however it ends.
struct WaiterGuard<'a> {
    table: &'a PendingTable,
    key: MessageId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.table.remove(&self.key) {
            debug!(
                target: "nakadachi::bridge",
                "Removed waiter {}",
                self.key
            );
        }
    }
}

/// Forwards queries to peers and waits for their correlated replies.
///
/// Cheap to share: concurrent [`forward`](Self::forward) calls each own an
/// independent wait and only meet inside the [`PendingTable`].
pub struct CorrelationBridge {
    table: Arc<PendingTable>,
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl CorrelationBridge {
    pub fn new(table: Arc<PendingTable>, transport: Arc<dyn Transport>) -> Self {
        Self {
            table,
            transport,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn table(&self) -> &Arc<PendingTable> {
        &self.table
    }

    /// Send `query` to `target` and wait up to `timeout` for its reply.
    ///
    /// Always returns a [`BridgeResult`]; failures are reported in `error`.
    /// Dropping the returned future removes the waiter.
    pub async fn forward(
        &self,
        target: &PeerAddress,
        query: &str,
        external_request_id: &str,
        timeout: Duration,
    ) -> BridgeResult {
        let outcome = self
            .try_forward(target, query, external_request_id, timeout, None)
            .await;
        BridgeResult::from_outcome(external_request_id, outcome)
    }

    /// Like [`forward`](Self::forward), but `cancel` ends the wait early with
    /// error `"cancelled"`.
    pub async fn forward_with_cancel(
        &self,
        target: &PeerAddress,
        query: &str,
        external_request_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> BridgeResult {
        let outcome = self
            .try_forward(target, query, external_request_id, timeout, Some(cancel))
            .await;
        BridgeResult::from_outcome(external_request_id, outcome)
    }

    async fn try_forward(
        &self,
        target: &PeerAddress,
        query: &str,
        external_request_id: &str,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> BridgeOutcome<Reply> {
        let key = MessageId::generate();
        let message = ChatMessage::text(key.clone(), query);

        let rx = self
            .table
            .register(key.clone(), target.clone(), external_request_id)
            .inspect_err(|e| {
                warn!(
                    target: "nakadachi::bridge",
                    "[{}] Failed to register waiter: {}",
                    external_request_id,
                    e
                );
            })?;
        let guard = WaiterGuard {
            table: &self.table,
            key,
        };

        info!(
            target: "nakadachi::bridge",
            "[{}] Forwarding to {} as {}",
            external_request_id,
            target,
            guard.key
        );

        if let Err(e) = self.transport.send(target, Envelope::Message(message)) {
            warn!(
                target: "nakadachi::bridge",
                "[{}] Send to {} failed: {}",
                external_request_id,
                target,
                e
            );
            return Err(BridgeError::SendFailure(e));
        }

        let deadline = Instant::now() + timeout;
        let result = self.wait(rx, &guard.key, deadline, cancel).await;

        match &result {
            Ok(reply) => info!(
                target: "nakadachi::bridge",
                "[{}] Reply from {} ({} bytes)",
                external_request_id,
                reply.sender,
                reply.payload.len()
            ),
            Err(e) => warn!(
                target: "nakadachi::bridge",
                "[{}] No reply from {}: {}",
                external_request_id,
                target,
                e
            ),
        }
        result
    }

    async fn wait(
        &self,
        mut rx: oneshot::Receiver<Reply>,
        key: &MessageId,
        deadline: Instant,
        cancel: Option<&CancellationToken>,
    ) -> BridgeOutcome<Reply> {
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let expired = tokio::select! {
            biased;

            reply = &mut rx => {
                return reply.map_err(|_| {
                    // The sender only disappears without a reply when the
                    // entry was expired or removed behind our back.
                    debug!(
                        target: "nakadachi::bridge",
                        "Waiter {} closed without a reply",
                        key
                    );
                    BridgeError::Timeout
                });
            }

            _ = tokio::time::sleep_until(deadline) => BridgeError::Timeout,

            _ = cancelled => BridgeError::Cancelled,
        };

        if self.table.expire(key) {
            return Err(expired);
        }
        // Resolution won the race against the deadline: the reply is already
        // in the channel.
        rx.try_recv().map_err(|_| expired)
    }
}
