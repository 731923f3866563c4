//! In-memory broker implementation.
//!
//! This implementation is suitable for:
//! - Single process deployments
//! - Development and testing
//!
//! Messages live only as long as the process. For anything that must survive a
//! restart, use the AMQP broker instead.
//!
//! Semantics mirror the AMQP topology: a queue with a message TTL holds each message
//! for that long and then moves it to its dead-letter target, and a delivery that is
//! dropped without being acked goes back to the front of its queue.

use async_trait::async_trait;
use dashmap::DashMap;
use portier_queue::{Acker, Broker, Delivery, DeliveryStream, QueueError, QueueSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, warn};

struct MemoryQueue {
    spec: QueueSpec,
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl MemoryQueue {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn messages(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_back(&self, body: Vec<u8>) {
        self.messages().push_back(body);
        self.notify.notify_one();
    }

    fn push_front(&self, body: Vec<u8>) {
        self.messages().push_front(body);
        self.notify.notify_one();
    }

    fn pop_front(&self) -> Option<Vec<u8>> {
        self.messages().pop_front()
    }
}

#[derive(Default)]
struct Inner {
    queues: DashMap<String, Arc<MemoryQueue>>,
    failing_publishes: AtomicUsize,
}

impl Inner {
    fn queue(&self, name: &str) -> Result<Arc<MemoryQueue>, QueueError> {
        self.queues
            .get(name)
            .map(|q| q.value().clone())
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    fn enqueue(self: &Arc<Self>, queue: Arc<MemoryQueue>, body: Vec<u8>) {
        queue.push_back(body);

        let (Some(ttl), Some(target)) = (queue.spec.message_ttl, queue.spec.dead_letter_to.clone())
        else {
            return;
        };

        // Every message in a TTL queue shares the same TTL, so expiring in FIFO order
        // moves the message that was pushed by this call.
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(expired) = queue.pop_front() else {
                return;
            };
            match inner.queue(&target) {
                Ok(target_queue) => {
                    debug!(from = %queue.spec.name, to = %target, "message expired, dead-lettering");
                    inner.enqueue(target_queue, expired);
                }
                Err(e) => warn!(error = %e, "dead-letter target missing, message lost"),
            }
        });
    }
}

/// In-process broker. Cheap to clone; clones share queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently held by a queue (0 if it was never declared).
    pub fn depth(&self, queue: &str) -> usize {
        self.inner
            .queues
            .get(queue)
            .map(|q| q.messages().len())
            .unwrap_or(0)
    }

    /// Copies of the bodies held by a queue, front first.
    pub fn snapshot(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .queues
            .get(queue)
            .map(|q| q.messages().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `n` publishes fail with a broker error.
    pub fn fail_next_publishes(&self, n: usize) {
        self.inner.failing_publishes.store(n, Ordering::SeqCst);
    }

    fn take_publish_failure(&self) -> bool {
        self.inner
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct MemoryAcker {
    queue: Arc<MemoryQueue>,
    /// Held until acked; handed back to the queue on drop otherwise.
    body: Option<Vec<u8>>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<(), QueueError> {
        self.body = None;
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(body) = self.body.take() {
            debug!(queue = %self.queue.spec.name, "unacked delivery returned to queue");
            self.queue.push_front(body);
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError> {
        if let Some(existing) = self.inner.queues.get(&spec.name) {
            if existing.spec != *spec {
                return Err(QueueError::Broker(format!(
                    "queue {} already declared with different arguments",
                    spec.name
                )));
            }
            return Ok(());
        }
        self.inner
            .queues
            .entry(spec.name.clone())
            .or_insert_with(|| Arc::new(MemoryQueue::new(spec.clone())));
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        if self.take_publish_failure() {
            return Err(QueueError::Broker(format!("publish to {} failed", queue)));
        }
        let target = self.inner.queue(queue)?;
        self.inner.enqueue(target, body);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, QueueError> {
        let queue = self.inner.queue(queue)?;

        let stream = futures::stream::unfold(queue, |queue| async move {
            loop {
                if let Some(body) = queue.pop_front() {
                    let acker = MemoryAcker {
                        queue: Arc::clone(&queue),
                        body: Some(body.clone()),
                    };
                    let delivery = Delivery::new(body, Box::new(acker));
                    return Some((Ok::<_, QueueError>(delivery), queue));
                }
                queue.notify.notified().await;
            }
        });

        Ok(Box::pin(stream))
    }
}
