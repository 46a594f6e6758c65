//! Message identifier used for request/reply correlation.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of a chat message.
///
/// The bridge uses the id of each outbound message as the correlation key of
/// its waiter, so keys and message ids are the same type. Ids minted here are
/// ULIDs; ids received from peers are kept verbatim, since peers may use
/// another scheme (UUIDs, counters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Mint a fresh, never-reused id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
