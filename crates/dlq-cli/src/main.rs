use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dlq::{Broker, QueueInspector, SqsBroker};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

mod config;
mod reader;

#[tokio::main]
pub async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = Cli::parse().run().await {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[derive(Debug, Parser)]
#[command(name = "dlq")]
#[command(about = "queue and dead letter queue inspector written in rust", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    broker: config::BrokerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the fully qualified host name of a namespace
    Namespace { resource: String },
    #[command(flatten)]
    Queue(QueueCommands),
}

/// Commands that talk to the queue service.
#[derive(Debug, Subcommand)]
enum QueueCommands {
    /// List queues with their active and dead-letter message counts
    List,
    /// Peek the oldest messages of a queue
    Peek {
        queue: String,

        #[arg(long, default_value_t = 10)]
        max: usize,

        /// Read the queue's dead-letter sub-queue instead
        #[arg(long)]
        dead_letter: bool,
    },
    /// Peek every message of a queue, page by page
    Pages {
        queue: String,

        #[arg(long, default_value_t = 10)]
        page_size: usize,

        /// Sequence number to start from
        #[arg(long)]
        from: Option<i64>,

        #[arg(long)]
        dead_letter: bool,
    },
    /// Find messages whose body contains a text
    Search {
        queue: String,
        condition: String,

        /// Stop after this many matches
        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        from: Option<i64>,

        #[arg(long)]
        dead_letter: bool,
    },
    /// Send a single message
    Send {
        queue: String,
        message: String,

        #[arg(long, default_value = "text/plain")]
        content_type: String,
    },
    /// Send one message per non-empty line of a file or stdin
    SendMany {
        queue: String,

        /// Reads from stdin if omitted
        file: Option<PathBuf>,

        #[arg(long, default_value = "text/plain")]
        content_type: String,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout().lock();

        match self.command {
            Commands::Namespace { resource } => {
                writeln!(stdout, "{}", dlq::naming::fully_qualified_namespace(&resource))?;
                Ok(())
            }
            Commands::Queue(command) => {
                let inspector =
                    QueueInspector::new(SqsBroker::from_config(self.broker.load().await));
                let cancel = CancellationToken::new();
                cancel_on_ctrl_c(cancel.clone());

                command.run(&inspector, &cancel, &mut stdout).await
            }
        }
    }
}

/// Cancels `cancel` on the first Ctrl-C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, stopping after the current page");
            cancel.cancel();
        }
    });
}

fn print_json(out: &mut impl Write, value: &impl serde::Serialize) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

impl QueueCommands {
    async fn run<B: Broker>(
        self,
        inspector: &QueueInspector<B>,
        cancel: &CancellationToken,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        match self {
            QueueCommands::List => {
                let mut queues = inspector.list_queues(cancel);
                while let Some(queue) = queues.try_next().await? {
                    print_json(out, &queue)?;
                }
            }
            QueueCommands::Peek {
                queue,
                max,
                dead_letter,
            } => {
                let messages = if dead_letter {
                    inspector.peek_dead_letter_page(&queue, max, cancel).await?
                } else {
                    inspector.peek_page(&queue, max, cancel).await?
                };
                for message in &messages {
                    print_json(out, message)?;
                }
            }
            QueueCommands::Pages {
                queue,
                page_size,
                from,
                dead_letter,
            } => {
                let mut pages = if dead_letter {
                    inspector.peek_all_dead_letter_paged(&queue, page_size, from, cancel)?
                } else {
                    inspector.peek_all_paged(&queue, page_size, from, cancel)?
                };

                let mut number = 0;
                while let Some(page) = pages.try_next().await? {
                    number += 1;
                    log::info!("page {number}: {} messages", page.len());
                    for message in &page {
                        print_json(out, message)?;
                    }
                }
            }
            QueueCommands::Search {
                queue,
                condition,
                limit,
                from,
                dead_letter,
            } => {
                let mut hits = if dead_letter {
                    inspector.search_dead_letter_paged(&queue, &condition, limit, from, cancel)?
                } else {
                    inspector.search_paged(&queue, &condition, limit, from, cancel)?
                };

                while let Some(message) = hits.try_next().await? {
                    print_json(out, &message)?;
                }
            }
            QueueCommands::Send {
                queue,
                message,
                content_type,
            } => {
                inspector.send_one(&queue, message, &content_type).await?;
            }
            QueueCommands::SendMany {
                queue,
                file,
                content_type,
            } => {
                let payloads = match file {
                    Some(path) => reader::read_payloads(tokio::fs::File::open(path).await?).await?,
                    None => reader::read_payloads(tokio::io::stdin()).await?,
                };
                log::info!("read {} payloads", payloads.len());
                inspector.send_many(&queue, payloads, &content_type).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlq::MemoryBroker;

    fn inspector() -> QueueInspector<MemoryBroker> {
        let broker = MemoryBroker::new();
        broker.create_queue("orders");
        for i in 0..5 {
            broker.enqueue("orders", format!("order {i}")).unwrap();
        }
        broker.dead_letter("orders", 3).unwrap();
        QueueInspector::new(broker)
    }

    async fn run(args: &[&str], inspector: &QueueInspector<MemoryBroker>) -> anyhow::Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("dlq").chain(args.iter().copied()))?;
        let Commands::Queue(command) = cli.command else {
            anyhow::bail!("{args:?} does not reach the queue service");
        };
        let mut out = Vec::new();
        command
            .run(inspector, &CancellationToken::new(), &mut out)
            .await?;
        Ok(String::from_utf8(out)?)
    }

    fn bodies(output: &str) -> Vec<String> {
        output
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["body"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn list_prints_counts() {
        let inspector = inspector();

        let output = run(&["list"], &inspector).await.unwrap();

        let queue: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(queue["name"], "orders");
        assert_eq!(queue["active_message_count"], 4);
        assert_eq!(queue["dead_letter_message_count"], 1);
    }

    #[tokio::test]
    async fn peek_dead_letter() {
        let inspector = inspector();

        let output = run(&["peek", "orders", "--dead-letter"], &inspector)
            .await
            .unwrap();

        assert_eq!(bodies(&output), vec!["order 2"]);
    }

    #[tokio::test]
    async fn pages_from_cursor() {
        let inspector = inspector();

        let output = run(&["pages", "orders", "--page-size", "2", "--from", "2"], &inspector)
            .await
            .unwrap();

        assert_eq!(bodies(&output), vec!["order 1", "order 3", "order 4"]);
    }

    #[tokio::test]
    async fn search_with_limit() {
        let inspector = inspector();

        let output = run(&["search", "orders", "order", "--limit", "2"], &inspector)
            .await
            .unwrap();

        assert_eq!(bodies(&output), vec!["order 0", "order 1"]);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let inspector = inspector();

        let err = run(&["search", "orders", "order", "--limit", "0"], &inspector)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("limit must be greater than or equal to 1"));
        assert!(inspector.broker().peeks().is_empty());
    }

    #[tokio::test]
    async fn send_with_content_type() {
        let inspector = inspector();

        run(
            &["send", "orders", r#"{"id":9}"#, "--content-type", "application/json"],
            &inspector,
        )
        .await
        .unwrap();

        let page = inspector
            .peek_page("orders", 10, &CancellationToken::new())
            .await
            .unwrap();
        let last = page.last().unwrap();
        assert_eq!(last.body_text(), r#"{"id":9}"#);
        assert_eq!(last.content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn namespace_needs_no_queue_service() {
        let cli = Cli::try_parse_from(["dlq", "namespace", "contoso"]).unwrap();

        assert!(matches!(cli.command, Commands::Namespace { resource } if resource == "contoso"));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["dlq", "something"]).is_err());
    }
}
