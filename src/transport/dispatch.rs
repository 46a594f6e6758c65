//! Inbound dispatch: a single task that drains the shared inbound queue and
//! invokes the handler once per envelope.

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{InboundHandler, PeerAddress};
use crate::protocol::Envelope;

/// Capacity of the inbound queue shared by all peer readers.
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// An envelope received from a peer.
#[derive(Debug)]
pub struct Inbound {
    pub sender: PeerAddress,
    pub envelope: Envelope,
}

/// Handle to a running dispatcher. Dropping it stops the task.
pub struct DispatcherHandle {
    _join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn the task that hands each queued inbound envelope to `handler`.
pub fn spawn_inbound_dispatcher(
    rx: mpsc::Receiver<Inbound>,
    handler: Arc<dyn InboundHandler>,
) -> DispatcherHandle {
    let cancel_token = CancellationToken::new();
    let join_handle = tokio::spawn(dispatch_loop(rx, handler, cancel_token.clone()));

    DispatcherHandle {
        _join_handle: join_handle,
        cancel_token,
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Inbound>,
    handler: Arc<dyn InboundHandler>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "nakadachi::transport::dispatch",
                    "Dispatcher cancelled, shutting down"
                );
                return;
            }

            inbound = rx.recv() => {
                let Some(Inbound { sender, envelope }) = inbound else {
                    debug!(
                        target: "nakadachi::transport::dispatch",
                        "Inbound queue closed, dispatcher exiting"
                    );
                    return;
                };
                handler.on_inbound(sender, envelope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatAcknowledgement, MessageId};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<PeerAddress>>);

    impl InboundHandler for Collect {
        fn on_inbound(&self, sender: PeerAddress, _envelope: Envelope) {
            self.0.lock().unwrap().push(sender);
        }
    }

    #[tokio::test]
    async fn handler_sees_every_inbound_in_order() {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let handler = Arc::new(Collect::default());
        let _dispatcher = spawn_inbound_dispatcher(rx, handler.clone());

        for peer in ["a", "b", "c"] {
            tx.send(Inbound {
                sender: PeerAddress::from(peer),
                envelope: Envelope::Acknowledgement(ChatAcknowledgement::new(MessageId::from(
                    "m",
                ))),
            })
            .await
            .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while handler.0.lock().unwrap().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all inbound should be dispatched");

        let seen = handler.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                PeerAddress::from("a"),
                PeerAddress::from("b"),
                PeerAddress::from("c")
            ]
        );
    }
}
