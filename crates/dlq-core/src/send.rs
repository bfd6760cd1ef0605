use anyhow::{bail, Context};
use async_trait::async_trait;
use aws_sdk_sqs::types::{MessageAttributeValue, SendMessageBatchRequestEntry};

use crate::broker::QueueSender;
use crate::model::OutgoingMessage;
use crate::sqs::CONTENT_TYPE_ATTRIBUTE;

/// SQS rejects batches larger than this.
const BATCH_LIMIT: usize = 10;

/// Sender bound to a single SQS queue url.
pub struct SqsSender {
    pub(crate) client: aws_sdk_sqs::Client,
    pub(crate) queue_url: String,
}

fn content_type(value: &str) -> anyhow::Result<MessageAttributeValue> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .context("failed to build content type attribute")
}

fn body(message: OutgoingMessage) -> anyhow::Result<(String, String)> {
    let body = String::from_utf8(message.body).context("SQS message bodies must be UTF-8")?;
    Ok((body, message.content_type))
}

#[async_trait]
impl QueueSender for SqsSender {
    async fn send_message(&mut self, message: OutgoingMessage) -> anyhow::Result<()> {
        let (body, ty) = body(message)?;

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_attributes(CONTENT_TYPE_ATTRIBUTE, content_type(&ty)?)
            .send()
            .await
            .context("failed to send message")?;

        Ok(())
    }

    /// Sends in batches of ten. Every entry is built before the first batch
    /// goes out, and a rejected entry fails the call.
    async fn send_messages(&mut self, messages: Vec<OutgoingMessage>) -> anyhow::Result<()> {
        let entries = messages
            .into_iter()
            .map(|message| {
                let (body, ty) = body(message)?;
                SendMessageBatchRequestEntry::builder()
                    .id(uuid::Uuid::new_v4().to_string())
                    .message_body(body)
                    .message_attributes(CONTENT_TYPE_ATTRIBUTE, content_type(&ty)?)
                    .build()
                    .context("failed to build message entry")
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        for batch in entries.chunks(BATCH_LIMIT) {
            let output = self
                .client
                .send_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(batch.to_vec()))
                .send()
                .await
                .context("failed to send message batch")?;

            if let Some(failed) = output.failed().first() {
                bail!(
                    "message {} was rejected ({}): {}",
                    failed.id(),
                    failed.code(),
                    failed.message().unwrap_or("no reason given")
                );
            }
        }

        Ok(())
    }
}
