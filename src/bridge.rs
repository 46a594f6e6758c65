//! Synchronous-to-asynchronous request correlation.
//!
//! ## Module Structure
//!
//! - `pending` - PendingTable, the only shared mutable state
//! - `matcher` - ReplyMatcher, resolves waiters from inbound messages
//! - `correlation` - CorrelationBridge, send / register / wait / clean up
//! - `ack` - AckResponder, best-effort acknowledgements
//!
//! # Wiring
//!
//! ```ignore
//! let table = Arc::new(PendingTable::new());
//! let bridge = CorrelationBridge::new(table.clone(), transport.clone());
//! let matcher = ReplyMatcher::new(table, AckResponder::new(transport), MatchPolicy::Strict);
//! let _dispatcher = spawn_inbound_dispatcher(inbound_rx, Arc::new(matcher));
//! let result = bridge.forward(&target, "ping", "req-1", DEFAULT_TIMEOUT).await;
//! ```

mod ack;
mod correlation;
mod matcher;
mod pending;
#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};

use crate::error::BridgeOutcome;

pub use ack::AckResponder;
pub use correlation::{CorrelationBridge, DEFAULT_TIMEOUT};
pub use matcher::{MatchOutcome, MatchPolicy, ReplyMatcher};
pub use pending::{PendingTable, Reply, WaiterStatus, WaiterView};

/// What the synchronous caller gets back for every forwarded request.
///
/// `error` is empty iff `success` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeResult {
    pub success: bool,
    #[serde(default)]
    pub response: String,
    /// The caller-supplied request id, echoed back unchanged.
    pub request_id: String,
    #[serde(default)]
    pub error: String,
}

impl BridgeResult {
    pub fn success(request_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            request_id: request_id.into(),
            error: String::new(),
        }
    }

    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: String::new(),
            request_id: request_id.into(),
            error: error.into(),
        }
    }

    pub(crate) fn from_outcome(request_id: &str, outcome: BridgeOutcome<Reply>) -> Self {
        match outcome {
            Ok(reply) => Self::success(request_id, reply.payload),
            Err(e) => Self::failure(request_id, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::protocol::MessageId;
    use crate::transport::PeerAddress;
    use serde_json::json;

    #[test]
    fn success_serializes_with_empty_error() {
        let value = serde_json::to_value(BridgeResult::success("req-1", "pong")).unwrap();
        assert_eq!(
            value,
            json!({"success": true, "response": "pong", "request_id": "req-1", "error": ""})
        );
    }

    #[test]
    fn outcome_errors_become_error_strings() {
        let result = BridgeResult::from_outcome("req-2", Err(BridgeError::Timeout));
        assert_eq!(result, BridgeResult::failure("req-2", "timeout"));

        let result = BridgeResult::from_outcome(
            "req-3",
            Err(BridgeError::DuplicateKey {
                key: MessageId::from("k"),
            }),
        );
        assert!(!result.success);
        assert!(result.error.starts_with("internal:"), "got {}", result.error);
    }

    #[test]
    fn outcome_reply_becomes_response() {
        let reply = Reply {
            payload: "pong".to_string(),
            sender: PeerAddress::from("peer-a"),
        };
        assert_eq!(
            BridgeResult::from_outcome("req-1", Ok(reply)),
            BridgeResult::success("req-1", "pong")
        );
    }
}
