//! # dlq-core
//!
//! Core library for inspecting message queues and their dead letter queues.
//!
//! This crate pages through and searches queues without consuming from them,
//! and publishes messages, on top of any service that implements [`Broker`].
//!
//! ## Features
//!
//! - **Queue Listing**: Stream every queue with its active and dead-letter counts
//! - **Peeking**: Read a page of messages, or stream the whole queue page by page
//! - **Searching**: Stream messages whose body contains a text, up to a limit
//! - **Dead Letters**: Every peek and search has a dead-letter variant
//! - **Sending**: Publish one message or a batch with a content type
//!
//! Two brokers ship with the crate: [`SqsBroker`] for AWS SQS and
//! [`MemoryBroker`] for tests and local experiments.
//!
//! ## Example
//!
//! ```no_run
//! use dlq::{QueueInspector, SqsBroker};
//! use futures::TryStreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), dlq::Error> {
//! // Load AWS configuration
//! let config = aws_config::from_env().load().await;
//! let inspector = QueueInspector::new(SqsBroker::from_config(config));
//! let cancel = CancellationToken::new();
//!
//! // Search the dead letters of `orders` for a customer id
//! let mut hits = inspector.search_dead_letter_paged("orders", "customer-42", 10, None, &cancel)?;
//! while let Some(message) = hits.try_next().await? {
//!     println!("{}: {}", message.sequence_number, message.body_text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod broker;
mod error;
mod inspector;
pub mod memory;
mod model;
pub mod naming;
mod send;
mod sqs;

#[cfg(test)]
mod test_utils;

pub use broker::{Broker, QueueReceiver, QueueSender};
pub use error::{Error, Result};
pub use inspector::*;
pub use memory::MemoryBroker;
pub use model::*;
pub use send::SqsSender;
pub use sqs::*;
