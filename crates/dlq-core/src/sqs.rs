//! Broker backed by AWS SQS.
//!
//! SQS has no true peek. Messages are received with a zero visibility timeout
//! so they stay available to other consumers, which makes each peek
//! approximate: SQS decides which messages a receive returns. Every receive
//! also increments the message's receive count, so on a queue with a redrive
//! policy repeated peeks can move messages to its dead-letter queue.
//!
//! `SentTimestamp` serves as the sequence number. Several messages can share a
//! millisecond, so messages are ordered by timestamp, then by the FIFO
//! `SequenceNumber` when there is one, then by message id. The cursor after a
//! page stays on the last timestamp and the receiver skips the messages it
//! already returned.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs as sqs;
use sqs::types::{MessageSystemAttributeName, QueueAttributeName};

use crate::broker::{Broker, QueueReceiver};
use crate::model::{Message, QueueInfo, QueueListing};
use crate::naming;
use crate::send::SqsSender;

/// Largest number of messages a single SQS receive can return.
const RECEIVE_LIMIT: usize = 10;
/// Receive rounds allowed on top of the ones needed to fill a page.
const EXTRA_RECEIVE_ROUNDS: usize = 10;

/// Message attribute carrying the content type of a message.
pub const CONTENT_TYPE_ATTRIBUTE: &str = "ContentType";

/// Receives up to `max_messages` messages without hiding them from other consumers.
///
/// # Errors
///
/// Returns an error if the SQS API call fails.
pub async fn receive(
    client: &aws_sdk_sqs::Client,
    queue_url: &str,
    max_messages: usize,
) -> anyhow::Result<aws_sdk_sqs::operation::receive_message::ReceiveMessageOutput> {
    let result = client
        .receive_message()
        .set_queue_url(Some(queue_url.to_string()))
        .set_max_number_of_messages(Some(max_messages.clamp(1, RECEIVE_LIMIT) as i32))
        .set_visibility_timeout(Some(0))
        .message_system_attribute_names(MessageSystemAttributeName::All)
        .message_attribute_names("All")
        .send()
        .await;

    result.context("failed to receive messages")
}

/// [`Broker`] over an SQS account.
///
/// Dead-letter addresses (`orders/$deadletterqueue`) resolve to the queue
/// named by the parent queue's redrive policy.
///
/// # Example
///
/// ```no_run
/// use dlq::{QueueInspector, SqsBroker};
/// use futures::TryStreamExt;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), dlq::Error> {
/// let config = aws_config::from_env().load().await;
/// let inspector = QueueInspector::new(SqsBroker::from_config(config));
///
/// let queues: Vec<_> = inspector
///     .list_queues(&CancellationToken::new())
///     .try_collect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqsBroker {
    /// The AWS SDK configuration used for SQS operations
    pub config: SdkConfig,
    /// The SQS client instance
    pub client: sqs::Client,
}

impl SqsBroker {
    /// Creates a broker from a pre-built AWS SDK config, so the caller decides
    /// on credentials and endpoints (e.g. LocalStack).
    pub fn from_config(config: SdkConfig) -> Self {
        let client = sqs::Client::new(&config);
        Self { config, client }
    }

    async fn queue_url(&self, queue_name: &str) -> anyhow::Result<String> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .with_context(|| format!("failed to resolve queue '{queue_name}'"))?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no url returned for queue '{queue_name}'"))
    }

    async fn attributes(
        &self,
        queue_url: &str,
    ) -> anyhow::Result<HashMap<QueueAttributeName, String>> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::RedrivePolicy)
            .send()
            .await
            .with_context(|| format!("failed to read attributes of {queue_url}"))?;

        Ok(output.attributes.unwrap_or_default())
    }

    /// Maps a queue address to a queue url.
    async fn resolve(&self, queue_name: &str) -> anyhow::Result<String> {
        let Some(parent) = naming::dead_letter_parent(queue_name) else {
            return self.queue_url(queue_name).await;
        };

        let url = self.queue_url(parent).await?;
        let attributes = self.attributes(&url).await?;
        let target = dead_letter_target(&attributes)?
            .ok_or_else(|| anyhow!("queue '{parent}' has no dead-letter queue configured"))?;

        self.queue_url(&target).await
    }

    async fn queue_info(&self, queue_url: &str) -> anyhow::Result<QueueInfo> {
        let attributes = self.attributes(queue_url).await?;

        let dead_letter_count = match dead_letter_target(&attributes)? {
            Some(target) => {
                let target_url = self.queue_url(&target).await?;
                approximate_count(&self.attributes(&target_url).await?)
            }
            None => 0,
        };

        Ok(QueueInfo::new(
            queue_name_from_url(queue_url),
            approximate_count(&attributes),
            dead_letter_count,
        ))
    }
}

#[async_trait]
impl Broker for SqsBroker {
    type Receiver = SqsReceiver;
    type Sender = SqsSender;

    async fn list_queues(&self, next_token: Option<String>) -> anyhow::Result<QueueListing> {
        let output = self
            .client
            .list_queues()
            .set_next_token(next_token)
            .send()
            .await
            .context("failed to list queues")?;

        let mut queues = Vec::new();
        for url in output.queue_urls.unwrap_or_default() {
            queues.push(self.queue_info(&url).await?);
        }

        Ok(QueueListing {
            queues,
            next_token: output.next_token,
        })
    }

    async fn create_receiver(&self, queue_name: &str) -> anyhow::Result<Self::Receiver> {
        let queue_url = self.resolve(queue_name).await?;

        if let Some(warning) = redrive_warning(queue_name, &self.attributes(&queue_url).await?) {
            log::warn!("{warning}");
        }

        Ok(SqsReceiver {
            client: self.client.clone(),
            queue_url,
            history: PeekHistory::default(),
        })
    }

    async fn create_sender(&self, queue_name: &str) -> anyhow::Result<Self::Sender> {
        Ok(SqsSender {
            client: self.client.clone(),
            queue_url: self.resolve(queue_name).await?,
        })
    }
}

pub struct SqsReceiver {
    client: sqs::Client,
    queue_url: String,
    history: PeekHistory,
}

/// Number of receive rounds one peek of `max_messages` may spend.
fn receive_rounds(max_messages: usize) -> usize {
    max_messages.div_ceil(RECEIVE_LIMIT) + EXTRA_RECEIVE_ROUNDS
}

#[async_trait]
impl QueueReceiver for SqsReceiver {
    /// Receives in rounds until `max_messages` new messages were seen, a
    /// round returns nothing new, or the round budget runs out.
    async fn peek_messages(
        &mut self,
        max_messages: usize,
        from_sequence_number: Option<i64>,
    ) -> anyhow::Result<Vec<Message>> {
        let from = from_sequence_number.unwrap_or(i64::MIN);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for _ in 0..receive_rounds(max_messages) {
            let wanted = max_messages.saturating_sub(candidates.len());
            let output = receive(&self.client, &self.queue_url, wanted).await?;

            let received = output.messages.unwrap_or_default();
            if received.is_empty() {
                break;
            }

            let mut fresh = false;
            for message in received {
                let fifo = fifo_sequence_number(&message);
                let message = from_sqs_message(message)?;
                if !seen.insert(message.message_id.clone()) {
                    continue;
                }
                fresh = true;
                if self.history.is_pending(&message, from) {
                    candidates.push((fifo, message));
                }
            }

            if !fresh || candidates.len() >= max_messages {
                break;
            }
        }

        Ok(self.history.take_page(candidates, max_messages))
    }

    /// Timestamps are not unique, so the next page starts at the last one.
    fn cursor_after(&self, last: &Message) -> Option<i64> {
        Some(last.sequence_number)
    }
}

/// Ids of the messages a receiver already returned.
#[derive(Default)]
struct PeekHistory {
    delivered: HashSet<String>,
}

impl PeekHistory {
    fn is_pending(&self, message: &Message, from: i64) -> bool {
        message.sequence_number >= from && !self.delivered.contains(&message.message_id)
    }

    /// Orders the candidates and keeps the first `max_messages` of them.
    fn take_page(
        &mut self,
        mut candidates: Vec<(Option<u128>, Message)>,
        max_messages: usize,
    ) -> Vec<Message> {
        candidates.sort_by(|(a_fifo, a), (b_fifo, b)| {
            (a.sequence_number, a_fifo, &a.message_id).cmp(&(
                b.sequence_number,
                b_fifo,
                &b.message_id,
            ))
        });
        candidates.truncate(max_messages);

        candidates
            .into_iter()
            .map(|(_, message)| {
                self.delivered.insert(message.message_id.clone());
                message
            })
            .collect()
    }
}

/// The 128-bit `SequenceNumber` SQS assigns to messages of FIFO queues.
fn fifo_sequence_number(message: &sqs::types::Message) -> Option<u128> {
    message
        .attributes
        .as_ref()?
        .get(&MessageSystemAttributeName::SequenceNumber)?
        .parse()
        .ok()
}

fn redrive_warning(
    queue_name: &str,
    attributes: &HashMap<QueueAttributeName, String>,
) -> Option<String> {
    attributes
        .contains_key(&QueueAttributeName::RedrivePolicy)
        .then(|| {
            format!(
                "peeking '{queue_name}' increments receive counts, its redrive policy may move \
                 peeked messages to the dead-letter queue"
            )
        })
}

/// Converts an AWS SDK message into a broker-neutral [`Message`].
///
/// # See Also
///
/// - [AWS SQS Message API Reference](https://docs.aws.amazon.com/AWSSimpleQueueService/latest/APIReference/API_Message.html)
pub fn from_sqs_message(message: sqs::types::Message) -> anyhow::Result<Message> {
    let message_id = message.message_id.context("missing message_id")?;

    let sequence_number = message
        .attributes
        .as_ref()
        .and_then(|attributes| attributes.get(&MessageSystemAttributeName::SentTimestamp))
        .and_then(|timestamp| timestamp.parse::<i64>().ok())
        .with_context(|| format!("message {message_id} has no SentTimestamp"))?;

    let content_type = message
        .message_attributes
        .as_ref()
        .and_then(|attributes| attributes.get(CONTENT_TYPE_ATTRIBUTE))
        .and_then(|value| value.string_value())
        .map(str::to_string);

    Ok(Message {
        sequence_number,
        message_id,
        body: message.body.unwrap_or_default().into_bytes(),
        content_type,
    })
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedrivePolicy {
    dead_letter_target_arn: String,
}

/// Name of the dead-letter queue the redrive policy points at, if there is one.
fn dead_letter_target(
    attributes: &HashMap<QueueAttributeName, String>,
) -> anyhow::Result<Option<String>> {
    let Some(policy) = attributes.get(&QueueAttributeName::RedrivePolicy) else {
        return Ok(None);
    };

    let policy: RedrivePolicy =
        serde_json::from_str(policy).context("failed to parse redrive policy")?;

    Ok(policy
        .dead_letter_target_arn
        .rsplit(':')
        .next()
        .map(str::to_string))
}

fn approximate_count(attributes: &HashMap<QueueAttributeName, String>) -> i64 {
    attributes
        .get(&QueueAttributeName::ApproximateNumberOfMessages)
        .and_then(|count| count.parse().ok())
        .unwrap_or(0)
}

fn queue_name_from_url(queue_url: &str) -> &str {
    queue_url.rsplit('/').next().unwrap_or(queue_url)
}
