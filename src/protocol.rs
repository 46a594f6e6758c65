//! Wire types exchanged with peers.
//!
//! ## Module Structure
//!
//! - `message_id` - MessageId type used as the correlation key
//! - `message` - Chat message and acknowledgement envelopes
//! - `framing` - `Content-Length` framing over async byte streams

mod framing;
mod message;
mod message_id;

pub use framing::{FrameReader, FrameWriter, FramingError, MAX_FRAME_SIZE};
pub use message::{ChatAcknowledgement, ChatMessage, Content, Envelope};
pub use message_id::MessageId;
