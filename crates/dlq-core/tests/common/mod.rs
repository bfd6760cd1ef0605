use dlq::{MemoryBroker, QueueInspector};

/// Creates an inspector over a single queue holding `count` messages with
/// bodies produced by `body`.
pub fn inspector_with(
    queue_name: &str,
    count: usize,
    body: impl Fn(usize) -> String,
) -> QueueInspector<MemoryBroker> {
    let broker = MemoryBroker::new();
    broker.create_queue(queue_name);
    for i in 0..count {
        broker.enqueue(queue_name, body(i)).unwrap();
    }
    QueueInspector::new(broker)
}
