//! Broker-neutral queue and message types.

use serde::{Serialize, Serializer};

/// Snapshot of a queue and its runtime message counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    /// The queue name as known to the broker
    pub name: String,
    /// Messages currently available for delivery
    pub active_message_count: i64,
    /// Messages parked in the queue's dead-letter sub-queue
    pub dead_letter_message_count: i64,
}

impl QueueInfo {
    pub fn new(name: impl Into<String>, active: i64, dead_letter: i64) -> Self {
        Self {
            name: name.into(),
            active_message_count: active,
            dead_letter_message_count: dead_letter,
        }
    }
}

/// One page of the broker's queue listing.
#[derive(Clone, Debug, Default)]
pub struct QueueListing {
    pub queues: Vec<QueueInfo>,
    /// Token for the next listing page, `None` on the last page
    pub next_token: Option<String>,
}

/// A message as returned by a peek.
///
/// Messages are owned by the broker and never modified locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Broker assigned ordinal, strictly increasing within a queue
    pub sequence_number: i64,
    /// Broker assigned identifier
    pub message_id: String,
    /// Raw payload, serialized as text
    #[serde(serialize_with = "body_as_text")]
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl Message {
    /// Renders the body as UTF-8 text, replacing invalid sequences.
    ///
    /// Search conditions are matched against this rendering.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

fn body_as_text<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}

/// Payload handed to a sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub content_type: String,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }
}
