//! Error types for the correlation bridge.
//!
//! Every failure a [`CorrelationBridge`](crate::bridge::CorrelationBridge) call
//! can hit is a [`BridgeError`]. None of them escape to the caller as a fault:
//! they are folded into [`BridgeResult::error`](crate::bridge::BridgeResult).

use std::sync::PoisonError;
use thiserror::Error;

use crate::protocol::MessageId;
use crate::transport::{PeerAddress, SendError};

/// Failure kinds of a single forwarded request.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Outbound delivery failed. Reported immediately, never retried.
    #[error("send failure: {0}")]
    SendFailure(#[from] SendError),

    /// No matching reply arrived within the timeout budget.
    #[error("timeout")]
    Timeout,

    /// The caller abandoned the request before a reply arrived.
    #[error("cancelled")]
    Cancelled,

    /// A correlation key was registered twice. Indicates a broken key generator.
    #[error("internal: duplicate correlation key {key}")]
    DuplicateKey { key: MessageId },

    /// An inbound message carried no usable correlation field.
    #[error("malformed reply from {sender}: {reason}")]
    MalformedReply { sender: PeerAddress, reason: String },
}

/// Result type for bridge operations
pub type BridgeOutcome<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Create a malformed reply error
    pub fn malformed(sender: &PeerAddress, reason: impl Into<String>) -> Self {
        BridgeError::MalformedReply {
            sender: sender.clone(),
            reason: reason.into(),
        }
    }
}

/// Helper trait to recover a guard from a poisoned lock.
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation hit it.
    ///
    /// The pending table holds no invariant that a panicking holder could leave
    /// half-written, so recovery is always sound.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "nakadachi::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
