//! Chat message and acknowledgement envelopes.
//!
//! Every frame on a peer stream carries exactly one [`Envelope`], tagged by
//! its `"type"` field:
//!
//! ```json
//! {"type":"message","msg_id":"01J...","timestamp":"2026-01-01T00:00:00Z",
//!  "in_reply_to":"01J...","content":[{"type":"text","text":"pong"}]}
//! {"type":"acknowledgement","acknowledged_msg_id":"01J...","timestamp":"..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// One unit of application traffic between the bridge and a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Message(ChatMessage),
    Acknowledgement(ChatAcknowledgement),
}

/// A chat message carrying content items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub msg_id: MessageId,
    pub timestamp: DateTime<Utc>,
    /// Id of the message this one answers. Absent on requests, and on replies
    /// from peers whose protocol has no reply reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    #[serde(default)]
    pub content: Vec<Content>,
}

/// A content item inside a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    /// Any content kind this bridge does not interpret (resources, metadata, ...).
    #[serde(other)]
    Unsupported,
}

/// Transport-level receipt for a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAcknowledgement {
    pub acknowledged_msg_id: MessageId,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a request message with a single text item.
    pub fn text(msg_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            msg_id,
            timestamp: Utc::now(),
            in_reply_to: None,
            content: vec![Content::Text { text: text.into() }],
        }
    }

    /// Build a reply to `in_reply_to` with a single text item.
    pub fn reply(msg_id: MessageId, in_reply_to: MessageId, text: impl Into<String>) -> Self {
        Self {
            in_reply_to: Some(in_reply_to),
            ..Self::text(msg_id, text)
        }
    }

    /// Concatenate every text item in order. Non-text items are skipped.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                Content::Text { text } => Some(text.as_str()),
                Content::Unsupported => None,
            })
            .collect()
    }
}

impl ChatAcknowledgement {
    pub fn new(acknowledged_msg_id: MessageId) -> Self {
        Self {
            acknowledged_msg_id,
            timestamp: Utc::now(),
        }
    }
}
