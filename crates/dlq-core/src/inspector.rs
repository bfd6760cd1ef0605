//! Paging and searching over a broker's peek primitive.

use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, QueueReceiver, QueueSender};
use crate::error::{Error, Result};
use crate::model::{Message, OutgoingMessage, QueueInfo};
use crate::naming;

/// Page size used internally by searches, independent of any caller page size.
pub const SEARCH_PAGE_SIZE: usize = 100;

pub type QueueStream<'a> = BoxStream<'a, Result<QueueInfo>>;
pub type PageStream<'a> = BoxStream<'a, Result<Vec<Message>>>;
pub type MessageStream<'a> = BoxStream<'a, Result<Message>>;

/// Lists, peeks, searches and publishes messages through a [`Broker`].
///
/// The inspector keeps no state between calls. Cursors and hit counts belong to
/// the stream returned by a single call, and every receiver or sender it opens
/// is dropped as soon as that call or stream is finished with it.
///
/// Paging stops at the first page shorter than the requested size. The check
/// is a heuristic: messages enqueued while a stream is running may or may not
/// be observed.
///
/// # Example
///
/// ```
/// use dlq::{MemoryBroker, QueueInspector};
/// use futures::TryStreamExt;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), dlq::Error> {
/// let broker = MemoryBroker::new();
/// broker.create_queue("orders");
/// for i in 0..25 {
///     broker.enqueue("orders", format!("order {i}"))?;
/// }
///
/// let inspector = QueueInspector::new(broker);
/// let pages: Vec<_> = inspector
///     .peek_all_paged("orders", 10, None, &CancellationToken::new())?
///     .try_collect()
///     .await?;
/// assert_eq!(pages.len(), 3);
/// # Ok(())
/// # }
/// ```
pub struct QueueInspector<B> {
    broker: B,
}

impl<B: Broker> QueueInspector<B> {
    pub fn new(broker: B) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Streams every queue known to the broker, in broker order.
    ///
    /// Calling again re-queries the broker from the first listing page.
    pub fn list_queues(&self, cancel: &CancellationToken) -> QueueStream<'_> {
        let state = Listing {
            broker: &self.broker,
            cancel: cancel.clone(),
            buffered: VecDeque::new(),
            next: Some(None),
        };

        stream::unfold(state, |mut listing| async move {
            loop {
                if let Some(queue) = listing.buffered.pop_front() {
                    return Some((Ok(queue), listing));
                }

                let token = listing.next.take()?;
                if listing.cancel.is_cancelled() {
                    return Some((Err(Error::Cancelled), listing));
                }

                match listing.broker.list_queues(token).await {
                    Ok(page) => {
                        log::debug!("listed {} queues", page.queues.len());
                        listing.buffered.extend(page.queues);
                        listing.next = page.next_token.map(Some);
                    }
                    Err(e) => return Some((Err(e.into()), listing)),
                }
            }
        })
        .boxed()
    }

    /// Peeks up to `max_page_size` messages from the oldest position of the queue.
    pub async fn peek_page(
        &self,
        queue_name: &str,
        max_page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        if max_page_size < 1 {
            return Err(Error::at_least_one("max_page_size"));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut receiver = self.broker.create_receiver(queue_name).await?;
        let messages = receiver.peek_messages(max_page_size, None).await?;
        log::debug!("peeked {} messages from {queue_name}", messages.len());

        Ok(messages)
    }

    /// Same as [`peek_page`](Self::peek_page) against the dead-letter sub-queue.
    pub async fn peek_dead_letter_page(
        &self,
        queue_name: &str,
        max_page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        let dead_letter = naming::dead_letter_queue_name(queue_name);
        self.peek_page(&dead_letter, max_page_size, cancel).await
    }

    /// Streams the queue page by page, starting at `start` or the oldest message.
    ///
    /// Every page except the last holds exactly `max_page_size` messages. Empty
    /// pages are never yielded. Fails before touching the broker when
    /// `max_page_size` is zero.
    pub fn peek_all_paged(
        &self,
        queue_name: &str,
        max_page_size: usize,
        start: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<PageStream<'_>> {
        if max_page_size < 1 {
            return Err(Error::at_least_one("max_page_size"));
        }

        let pager = Pager::new(&self.broker, queue_name, max_page_size, start, cancel);

        Ok(stream::unfold(pager, |mut pager| async move {
            if pager.done {
                return None;
            }
            match pager.next_page().await {
                Ok(page) if page.is_empty() => None,
                Ok(page) => Some((Ok(page), pager)),
                Err(e) => {
                    pager.finish();
                    Some((Err(e), pager))
                }
            }
        })
        .boxed())
    }

    pub fn peek_all_dead_letter_paged(
        &self,
        queue_name: &str,
        max_page_size: usize,
        start: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<PageStream<'_>> {
        let dead_letter = naming::dead_letter_queue_name(queue_name);
        self.peek_all_paged(&dead_letter, max_page_size, start, cancel)
    }

    /// Streams messages whose body contains `condition`, at most `limit` of them.
    ///
    /// Matching is case-sensitive substring containment over
    /// [`Message::body_text`]. The queue is read in pages of
    /// [`SEARCH_PAGE_SIZE`]; no page is fetched once `limit` matches were found.
    pub fn search_paged(
        &self,
        queue_name: &str,
        condition: &str,
        limit: usize,
        start: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<MessageStream<'_>> {
        if limit < 1 {
            return Err(Error::at_least_one("limit"));
        }

        let search = Search {
            pager: Pager::new(&self.broker, queue_name, SEARCH_PAGE_SIZE, start, cancel),
            condition: condition.to_string(),
            limit,
            hits: 0,
            matches: VecDeque::new(),
        };

        Ok(stream::unfold(search, |mut search| async move {
            loop {
                if search.hits >= search.limit {
                    return None;
                }
                if let Some(message) = search.matches.pop_front() {
                    search.hits += 1;
                    return Some((Ok(message), search));
                }
                if search.pager.done {
                    return None;
                }

                match search.pager.next_page().await {
                    Ok(page) => {
                        let condition = search.condition.as_str();
                        search.matches.extend(
                            page.into_iter()
                                .filter(|message| message.body_text().contains(condition)),
                        );
                    }
                    Err(e) => {
                        search.pager.finish();
                        return Some((Err(e), search));
                    }
                }
            }
        })
        .boxed())
    }

    pub fn search_dead_letter_paged(
        &self,
        queue_name: &str,
        condition: &str,
        limit: usize,
        start: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<MessageStream<'_>> {
        let dead_letter = naming::dead_letter_queue_name(queue_name);
        self.search_paged(&dead_letter, condition, limit, start, cancel)
    }

    pub async fn send_one(
        &self,
        queue_name: &str,
        payload: impl Into<Vec<u8>>,
        content_type: &str,
    ) -> Result<()> {
        let message = OutgoingMessage::new(payload, content_type);

        let mut sender = self.broker.create_sender(queue_name).await?;
        sender.send_message(message).await?;
        log::info!("sent 1 message to {queue_name}");

        Ok(())
    }

    /// Sends all payloads in one call. Either every message is accepted or the call fails.
    pub async fn send_many<I>(&self, queue_name: &str, payloads: I, content_type: &str) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        let messages: Vec<_> = payloads
            .into_iter()
            .map(|payload| OutgoingMessage::new(payload, content_type))
            .collect();

        if messages.is_empty() {
            return Ok(());
        }

        let count = messages.len();
        let mut sender = self.broker.create_sender(queue_name).await?;
        sender.send_messages(messages).await?;
        log::info!("sent {count} messages to {queue_name}");

        Ok(())
    }
}

struct Listing<'a, B> {
    broker: &'a B,
    cancel: CancellationToken,
    buffered: VecDeque<QueueInfo>,
    /// `Some(token)` while another listing page is due
    next: Option<Option<String>>,
}

/// Cursor-driven page fetcher shared by paging and search.
struct Pager<'a, B: Broker> {
    broker: &'a B,
    queue_name: String,
    receiver: Option<B::Receiver>,
    page_size: usize,
    cursor: Option<i64>,
    cancel: CancellationToken,
    done: bool,
}

impl<'a, B: Broker> Pager<'a, B> {
    fn new(
        broker: &'a B,
        queue_name: &str,
        page_size: usize,
        cursor: Option<i64>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            broker,
            queue_name: queue_name.to_string(),
            receiver: None,
            page_size,
            cursor,
            cancel: cancel.clone(),
            done: false,
        }
    }

    /// Fetches the page at the cursor and advances it.
    ///
    /// A page shorter than `page_size` marks the end of the queue.
    async fn next_page(&mut self) -> Result<Vec<Message>> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => self.broker.create_receiver(&self.queue_name).await?,
        };
        let receiver = self.receiver.insert(receiver);

        let page = receiver.peek_messages(self.page_size, self.cursor).await?;
        log::debug!(
            "peeked {} messages from {} at {:?}",
            page.len(),
            self.queue_name,
            self.cursor
        );

        match page.last() {
            Some(last) if page.len() == self.page_size => match receiver.cursor_after(last) {
                Some(cursor) => self.cursor = Some(cursor),
                None => self.finish(),
            },
            _ => self.finish(),
        }

        Ok(page)
    }

    fn finish(&mut self) {
        self.done = true;
        self.receiver = None;
    }
}

struct Search<'a, B: Broker> {
    pager: Pager<'a, B>,
    condition: String,
    limit: usize,
    hits: usize,
    matches: VecDeque<Message>,
}
