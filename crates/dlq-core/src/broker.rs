//! The seam between the inspector and a concrete queue service.
//!
//! A broker hands out receivers and senders scoped to a single queue. Both are
//! released when dropped, so callers never need an explicit close.

use async_trait::async_trait;

use crate::model::{Message, OutgoingMessage, QueueListing};

#[async_trait]
pub trait Broker: Send + Sync {
    type Receiver: QueueReceiver;
    type Sender: QueueSender;

    /// Lists one page of queues with their runtime counts.
    ///
    /// Pass the `next_token` of the previous page to continue; `None` starts over.
    async fn list_queues(&self, next_token: Option<String>) -> anyhow::Result<QueueListing>;

    /// Opens a receiver on `queue_name`, which may be a dead-letter address.
    async fn create_receiver(&self, queue_name: &str) -> anyhow::Result<Self::Receiver>;

    /// Opens a sender on `queue_name`.
    async fn create_sender(&self, queue_name: &str) -> anyhow::Result<Self::Sender>;
}

#[async_trait]
pub trait QueueReceiver: Send {
    /// Non-destructive read of up to `max_messages` messages in ascending
    /// sequence order, starting at `from_sequence_number` or the oldest message.
    async fn peek_messages(
        &mut self,
        max_messages: usize,
        from_sequence_number: Option<i64>,
    ) -> anyhow::Result<Vec<Message>>;

    /// Cursor for the page following a full page that ended with `last`.
    ///
    /// `None` means no later message can exist, which ends the paging.
    fn cursor_after(&self, last: &Message) -> Option<i64> {
        last.sequence_number.checked_add(1)
    }
}

#[async_trait]
pub trait QueueSender: Send {
    async fn send_message(&mut self, message: OutgoingMessage) -> anyhow::Result<()>;

    /// Sends all messages; a failure of any message fails the whole call.
    async fn send_messages(&mut self, messages: Vec<OutgoingMessage>) -> anyhow::Result<()>;
}
