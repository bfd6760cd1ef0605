//! In-memory broker for tests and local experiments.
//!
//! Queues live in a shared map behind a mutex. Each queue owns a sequence
//! counter starting at 1 that is shared by its active and dead-letter
//! messages, so dead-lettering keeps a message's sequence number. The broker
//! also records what was asked of it: every peek, every listing call and the
//! number of receivers and senders currently open.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::broker::{Broker, QueueReceiver, QueueSender};
use crate::model::{Message, OutgoingMessage, QueueInfo, QueueListing};
use crate::naming;

const DEFAULT_LISTING_PAGE_SIZE: usize = 100;

/// A peek as observed by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeekCall {
    pub queue_name: String,
    pub max_messages: usize,
    pub from_sequence_number: Option<i64>,
}

#[derive(Default)]
struct MemoryQueue {
    active: Vec<Message>,
    dead_letter: Vec<Message>,
    next_sequence_number: i64,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            next_sequence_number: 1,
            ..Default::default()
        }
    }

    fn push(&mut self, body: Vec<u8>, content_type: Option<String>) -> i64 {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number += 1;
        self.active.push(Message {
            sequence_number,
            message_id: uuid::Uuid::new_v4().to_string(),
            body,
            content_type,
        });
        sequence_number
    }
}

#[derive(Default)]
struct Inner {
    queues: Mutex<BTreeMap<String, MemoryQueue>>,
    peeks: Mutex<Vec<PeekCall>>,
    listing_calls: AtomicUsize,
    senders_opened: AtomicUsize,
    open_channels: AtomicUsize,
    fail_sends: AtomicBool,
}

impl Inner {
    /// Runs `f` against the active or dead-letter messages `queue_name` addresses.
    fn with_messages<T>(
        &self,
        queue_name: &str,
        f: impl FnOnce(&mut MemoryQueue, bool) -> T,
    ) -> anyhow::Result<T> {
        let (name, dead_letter) = match naming::dead_letter_parent(queue_name) {
            Some(parent) => (parent, true),
            None => (queue_name, false),
        };

        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| anyhow!("queue '{queue_name}' was not found"))?;

        Ok(f(queue, dead_letter))
    }
}

/// Releases its slot in the open channel count when dropped.
struct ChannelGuard(Arc<Inner>);

impl ChannelGuard {
    fn open(inner: &Arc<Inner>) -> Self {
        inner.open_channels.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.0.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cloning shares the underlying queues.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
    listing_page_size: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::default(),
            listing_page_size: DEFAULT_LISTING_PAGE_SIZE,
        }
    }

    /// Number of queues returned per listing page.
    pub fn with_listing_page_size(mut self, size: usize) -> Self {
        self.listing_page_size = size.max(1);
        self
    }

    /// Creates an empty queue; an existing queue is left untouched.
    pub fn create_queue(&self, name: &str) {
        self.inner
            .queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(MemoryQueue::new);
    }

    /// Appends a message to the active queue and returns its sequence number.
    pub fn enqueue(&self, queue_name: &str, body: impl Into<Vec<u8>>) -> anyhow::Result<i64> {
        let body = body.into();
        self.inner.with_messages(queue_name, |queue, dead_letter| -> anyhow::Result<i64> {
            if dead_letter {
                bail!("cannot enqueue directly to '{queue_name}'");
            }
            Ok(queue.push(body, None))
        })?
    }

    /// Moves an active message to the dead-letter sub-queue.
    pub fn dead_letter(&self, queue_name: &str, sequence_number: i64) -> anyhow::Result<()> {
        self.inner.with_messages(queue_name, |queue, _| -> anyhow::Result<()> {
            let index = queue
                .active
                .iter()
                .position(|m| m.sequence_number == sequence_number)
                .ok_or_else(|| anyhow!("message {sequence_number} not found in '{queue_name}'"))?;

            let message = queue.active.remove(index);
            let at = queue
                .dead_letter
                .partition_point(|m| m.sequence_number < sequence_number);
            queue.dead_letter.insert(at, message);
            Ok(())
        })?
    }

    /// Makes every following send fail until reset.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn peeks(&self) -> Vec<PeekCall> {
        self.inner.peeks.lock().clone()
    }

    pub fn listing_calls(&self) -> usize {
        self.inner.listing_calls.load(Ordering::SeqCst)
    }

    pub fn senders_opened(&self) -> usize {
        self.inner.senders_opened.load(Ordering::SeqCst)
    }

    /// Receivers and senders created and not yet dropped.
    pub fn open_channels(&self) -> usize {
        self.inner.open_channels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Receiver = MemoryReceiver;
    type Sender = MemorySender;

    async fn list_queues(&self, next_token: Option<String>) -> anyhow::Result<QueueListing> {
        self.inner.listing_calls.fetch_add(1, Ordering::SeqCst);

        let mut page: Vec<QueueInfo> = {
            let queues = self.inner.queues.lock();
            queues
                .iter()
                .filter(|(name, _)| {
                    next_token
                        .as_deref()
                        .map_or(true, |token| name.as_str() >= token)
                })
                .take(self.listing_page_size + 1)
                .map(|(name, queue)| {
                    QueueInfo::new(
                        name.clone(),
                        queue.active.len() as i64,
                        queue.dead_letter.len() as i64,
                    )
                })
                .collect()
        };

        let next_token = if page.len() > self.listing_page_size {
            page.pop().map(|queue| queue.name)
        } else {
            None
        };

        Ok(QueueListing {
            queues: page,
            next_token,
        })
    }

    async fn create_receiver(&self, queue_name: &str) -> anyhow::Result<Self::Receiver> {
        self.inner.with_messages(queue_name, |_, _| ())?;
        Ok(MemoryReceiver {
            queue_name: queue_name.to_string(),
            guard: ChannelGuard::open(&self.inner),
        })
    }

    async fn create_sender(&self, queue_name: &str) -> anyhow::Result<Self::Sender> {
        self.inner.with_messages(queue_name, |_, _| ())?;
        self.inner.senders_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySender {
            queue_name: queue_name.to_string(),
            guard: ChannelGuard::open(&self.inner),
        })
    }
}

pub struct MemoryReceiver {
    queue_name: String,
    guard: ChannelGuard,
}

#[async_trait]
impl QueueReceiver for MemoryReceiver {
    async fn peek_messages(
        &mut self,
        max_messages: usize,
        from_sequence_number: Option<i64>,
    ) -> anyhow::Result<Vec<Message>> {
        let inner = &self.guard.0;
        inner.peeks.lock().push(PeekCall {
            queue_name: self.queue_name.clone(),
            max_messages,
            from_sequence_number,
        });

        let from = from_sequence_number.unwrap_or(i64::MIN);
        inner.with_messages(&self.queue_name, |queue, dead_letter| {
            let messages = if dead_letter {
                &queue.dead_letter
            } else {
                &queue.active
            };
            messages
                .iter()
                .filter(|m| m.sequence_number >= from)
                .take(max_messages)
                .cloned()
                .collect()
        })
    }
}

pub struct MemorySender {
    queue_name: String,
    guard: ChannelGuard,
}

impl MemorySender {
    fn push_all(&self, messages: Vec<OutgoingMessage>) -> anyhow::Result<()> {
        let inner = &self.guard.0;
        if inner.fail_sends.load(Ordering::SeqCst) {
            bail!("send to '{}' was rejected", self.queue_name);
        }

        inner.with_messages(&self.queue_name, |queue, dead_letter| -> anyhow::Result<()> {
            if dead_letter {
                bail!("cannot send to '{}'", self.queue_name);
            }
            for message in messages {
                queue.push(message.body, Some(message.content_type));
            }
            Ok(())
        })?
    }
}

#[async_trait]
impl QueueSender for MemorySender {
    async fn send_message(&mut self, message: OutgoingMessage) -> anyhow::Result<()> {
        self.push_all(vec![message])
    }

    async fn send_messages(&mut self, messages: Vec<OutgoingMessage>) -> anyhow::Result<()> {
        self.push_all(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_start_at_one_and_survive_dead_lettering() {
        let broker = MemoryBroker::new();
        broker.create_queue("orders");
        assert_eq!(broker.enqueue("orders", "a").unwrap(), 1);
        assert_eq!(broker.enqueue("orders", "b").unwrap(), 2);

        broker.dead_letter("orders", 1).unwrap();

        let mut receiver = broker.create_receiver("orders/$deadletterqueue").await.unwrap();
        let dead = receiver.peek_messages(10, None).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].sequence_number, 1);
    }

    #[tokio::test]
    async fn peek_is_non_destructive() {
        let broker = MemoryBroker::new();
        broker.create_queue("orders");
        broker.enqueue("orders", "a").unwrap();

        let mut receiver = broker.create_receiver("orders").await.unwrap();
        let first = receiver.peek_messages(1, None).await.unwrap();
        let second = receiver.peek_messages(1, None).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_queue_is_an_error() {
        let broker = MemoryBroker::new();

        let err = broker.create_receiver("missing").await.err().unwrap();

        assert!(err.to_string().contains("missing"));
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn channels_are_counted_until_dropped() {
        let broker = MemoryBroker::new();
        broker.create_queue("orders");

        let receiver = broker.create_receiver("orders").await.unwrap();
        let sender = broker.create_sender("orders").await.unwrap();
        assert_eq!(broker.open_channels(), 2);

        drop(receiver);
        drop(sender);
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn listing_pages_resume_from_token() {
        let broker = MemoryBroker::new().with_listing_page_size(2);
        for name in ["a", "b", "c"] {
            broker.create_queue(name);
        }

        let first = broker.list_queues(None).await.unwrap();
        assert_eq!(first.queues.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("c"));

        let second = broker.list_queues(first.next_token).await.unwrap();
        assert_eq!(second.queues, vec![QueueInfo::new("c", 0, 0)]);
        assert!(second.next_token.is_none());
    }
}
