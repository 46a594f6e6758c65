//! nakadachi: a synchronous-to-asynchronous request correlation bridge.
//!
//! A caller submits `(target peer, query, request id)` and blocks; the bridge
//! sends the query to the peer as an asynchronous chat message, waits for the
//! reply that answers that message, and returns a [`BridgeResult`].

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod transport;

pub use bridge::{BridgeResult, CorrelationBridge, MatchPolicy, PendingTable, ReplyMatcher};
pub use error::BridgeError;
pub use server::QueryServer;
