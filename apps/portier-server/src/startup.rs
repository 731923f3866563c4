//! Dependency acquisition at startup.
//!
//! The database and the broker are connected concurrently. Each retries on its own with
//! capped exponential backoff (1s, 2s, 4s, ... up to 30s); both share one deadline, after
//! which startup fails.

use backon::{ExponentialBuilder, Retryable};
use portier_queue::{Broker, QueueError};
use portier_queue_amqp::AmqpBroker;
use portier_queue_memory::MemoryBroker;
use portier_storage::StoreError;
use portier_store_sqlite::SqliteStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("dependencies not ready within {0:?}")]
    Timeout(Duration),
    #[error("unsupported broker url: {0}")]
    InvalidBrokerUrl(String),
    #[error("{0} needs a broker shared between processes, memory:// is private to one")]
    InProcessBroker(&'static str),
    #[error("database: {0}")]
    Store(#[from] StoreError),
    #[error("broker: {0}")]
    Broker(#[from] QueueError),
}

/// Backoff bounds for dependency retries.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::new()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .without_max_times()
    }
}

/// Retry `operation` until it succeeds. Callers bound it with a deadline.
pub async fn with_startup_retry<F, Fut, T, E>(
    dependency: &'static str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    operation
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .notify(|err: &E, dur: Duration| {
            warn!(
                dependency,
                error = %err,
                retry_in_ms = dur.as_millis() as u64,
                "dependency not ready, retrying"
            );
        })
        .await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BrokerKind {
    Memory,
    Amqp,
}

impl BrokerKind {
    fn parse(url: &str) -> Result<Self, StartupError> {
        if url.starts_with("memory://") {
            Ok(BrokerKind::Memory)
        } else if url.starts_with("amqp://") || url.starts_with("amqps://") {
            Ok(BrokerKind::Amqp)
        } else {
            Err(StartupError::InvalidBrokerUrl(url.to_string()))
        }
    }
}

async fn open_broker(kind: BrokerKind, url: &str) -> Result<Arc<dyn Broker>, QueueError> {
    match kind {
        BrokerKind::Memory => Ok(Arc::new(MemoryBroker::new())),
        BrokerKind::Amqp => Ok(Arc::new(AmqpBroker::connect(url).await?)),
    }
}

/// Reject the in-process broker for commands whose tasks cross a process boundary.
pub fn require_shared_broker(command: &'static str, broker_url: &str) -> Result<(), StartupError> {
    match BrokerKind::parse(broker_url)? {
        BrokerKind::Memory => Err(StartupError::InProcessBroker(command)),
        BrokerKind::Amqp => Ok(()),
    }
}

/// Connect to the database and the broker under one shared deadline.
pub async fn connect(
    database_url: &str,
    broker_url: &str,
    deadline: Duration,
    policy: RetryPolicy,
) -> Result<(SqliteStore, Arc<dyn Broker>), StartupError> {
    let kind = BrokerKind::parse(broker_url)?;

    let store = async {
        with_startup_retry("database", &policy, || SqliteStore::open(database_url))
            .await
            .map_err(StartupError::from)
    };
    let broker = async {
        with_startup_retry("broker", &policy, || open_broker(kind, broker_url))
            .await
            .map_err(StartupError::from)
    };

    let (store, broker) = tokio::time::timeout(deadline, async { tokio::try_join!(store, broker) })
        .await
        .map_err(|_| StartupError::Timeout(deadline))??;

    info!("database and broker connected");
    Ok((store, broker))
}
