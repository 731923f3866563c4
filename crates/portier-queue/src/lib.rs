//! Reliable task delivery for portier.
//!
//! Every task family gets three durable queues:
//! - `F` (main): where producers publish and the consumer reads
//! - `F_retry`: per-message TTL, dead-letters back into `F` (broker-driven delay)
//! - `F_dlq`: terminal holding queue for tasks that exhausted their retries
//!
//! Broker implementations (in-memory, AMQP) implement [`Broker`]; [`Producer`] and
//! [`Consumer`] hold all retry and dead-letter policy so it is identical across brokers.

mod consumer;
mod producer;

pub use consumer::{Consumer, Outcome};
pub use producer::Producer;

use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Error type for queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Broker(String),
    #[error("invalid task envelope: {0}")]
    InvalidEnvelope(String),
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

/// A task handler failure. Always retried until the family's budget is spent.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl TaskError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// ───────────────────────────────────── Envelope ─────────────────────────────────────

/// Wire format of every message body: `{"task": ..., "data": ..., "retries": n}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub task: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Failed attempts so far. Survives republishing; the broker's own redelivery
    /// bookkeeping is reset on every hop.
    #[serde(default)]
    pub retries: u32,
}

impl QueueEvent {
    /// Build an envelope from an adjacently tagged task enum
    /// (`#[serde(tag = "task", content = "data")]`).
    pub fn from_task<T: Serialize>(task: &T) -> Result<Self, QueueError> {
        let value =
            serde_json::to_value(task).map_err(|e| QueueError::InvalidEnvelope(e.to_string()))?;
        let serde_json::Value::Object(mut map) = value else {
            return Err(QueueError::InvalidEnvelope(
                "task must serialize to an object".into(),
            ));
        };
        let task = match map.remove("task") {
            Some(serde_json::Value::String(name)) => name,
            _ => {
                return Err(QueueError::InvalidEnvelope(
                    "task must carry a string `task` tag".into(),
                ))
            }
        };
        Ok(Self {
            task,
            data: map.remove("data").unwrap_or(serde_json::Value::Null),
            retries: 0,
        })
    }

    /// Decode into the family's closed task set. Unknown task names fail here.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        let tagged = serde_json::json!({ "task": self.task, "data": self.data });
        serde_json::from_value(tagged).map_err(|e| QueueError::InvalidEnvelope(e.to_string()))
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(body).map_err(|e| QueueError::InvalidEnvelope(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::InvalidEnvelope(e.to_string()))
    }
}

// ───────────────────────────────────── Topology ─────────────────────────────────────

/// A task family: one main/retry/dead-letter triple and its retry budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamily {
    pub name: &'static str,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Declaration of one durable queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    /// Routing key on the default exchange that expired/rejected messages move to.
    pub dead_letter_to: Option<String>,
    /// Per-message TTL.
    pub message_ttl: Option<Duration>,
}

impl QueueFamily {
    pub const fn new(name: &'static str, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            name,
            max_retries,
            retry_delay,
        }
    }

    pub fn main_queue(&self) -> String {
        self.name.to_string()
    }

    pub fn retry_queue(&self) -> String {
        format!("{}_retry", self.name)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}_dlq", self.name)
    }

    /// The three queues, in declaration order.
    pub fn topology(&self) -> [QueueSpec; 3] {
        [
            QueueSpec {
                name: self.main_queue(),
                dead_letter_to: Some(self.dead_letter_queue()),
                message_ttl: None,
            },
            QueueSpec {
                name: self.retry_queue(),
                dead_letter_to: Some(self.main_queue()),
                message_ttl: Some(self.retry_delay),
            },
            QueueSpec {
                name: self.dead_letter_queue(),
                dead_letter_to: None,
                message_ttl: None,
            },
        ]
    }
}

// ────────────────────────────────────── Broker ──────────────────────────────────────

/// Acknowledges one physical delivery.
#[async_trait]
pub trait Acker: Send {
    async fn ack(&mut self) -> Result<(), QueueError>;
}

/// One physical message handed to a consumer.
///
/// Dropping a delivery without acking it hands it back to the broker.
pub struct Delivery {
    body: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self { body, acker }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub async fn ack(mut self) -> Result<(), QueueError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from one queue (prefetch 1).
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Message broker the producer and consumer run against.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare one durable queue if absent. Re-declaring with the same arguments is a no-op.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError>;

    /// Publish a persistent message to a queue through the default exchange.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError>;

    /// Start consuming a queue with at most one unacknowledged delivery in flight.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, QueueError>;

    /// Declare the main/retry/dead-letter triple of a family.
    async fn declare_family(&self, family: &QueueFamily) -> Result<(), QueueError> {
        for spec in family.topology() {
            self.declare_queue(&spec).await?;
        }
        Ok(())
    }
}

/// Handles the closed set of tasks of one family.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Adjacently tagged enum (`#[serde(tag = "task", content = "data")]`).
    type Task: Serialize + DeserializeOwned + Send + std::fmt::Debug;

    /// Must tolerate being called more than once for the same logical task.
    async fn handle(&self, task: Self::Task) -> Result<(), TaskError>;
}
