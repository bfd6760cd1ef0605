/// Spawns a task that reads lines from `reader` and sends them over a bounded
/// channel, so payloads can be consumed while the input is still being read.
///
/// Lines are sent without their trailing newline. The task stops at EOF, on
/// the first I/O error, or when the receiver is dropped.
pub fn concurrent_lines<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    reader: R,
    channel_capacity: usize,
) -> (
    tokio::task::JoinHandle<()>,
    tokio::sync::mpsc::Receiver<String>,
) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let (tx, rx) = tokio::sync::mpsc::channel::<String>(channel_capacity);
    let buffer = BufReader::new(reader);

    let task = tokio::spawn(async move {
        let mut lines = buffer.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Err(e) = tx.send(line).await {
                        log::error!("channel closed unexpectedly while sending line: {e}");
                        break;
                    }
                }
                Ok(None) => {
                    log::trace!("reached EOF, exiting reader task");
                    break;
                }
                Err(e) => {
                    log::error!("I/O error while reading lines: {e}. Stopping reader.");
                    break;
                }
            }
        }
    });

    (task, rx)
}

/// Collects every non-empty line of `reader` as a message payload.
pub async fn read_payloads<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    reader: R,
) -> anyhow::Result<Vec<String>> {
    let (handle, mut rx) = concurrent_lines(reader, 100);

    let mut payloads = Vec::new();
    while let Some(line) = rx.recv().await {
        if !line.trim().is_empty() {
            payloads.push(line);
        }
    }
    handle.await?;

    Ok(payloads)
}
