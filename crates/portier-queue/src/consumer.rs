use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{Broker, Delivery, QueueError, QueueEvent, QueueFamily, TaskHandler};

/// What happened to one delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Handler succeeded.
    Acked,
    /// Handler failed; a copy went to the retry queue.
    Retried { retries: u32 },
    /// Handler failed past the budget; a copy went to the dead-letter queue.
    DeadLettered { retries: u32 },
    /// Undecodable body or unknown task; acknowledged and discarded.
    Dropped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Retried { .. } => "retried",
            Outcome::DeadLettered { .. } => "dead_lettered",
            Outcome::Dropped => "dropped",
        }
    }
}

/// Pause after a delivery could not be settled before taking the next one.
const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Consumes one family's main queue and applies the retry policy.
pub struct Consumer<H> {
    broker: Arc<dyn Broker>,
    family: QueueFamily,
    handler: H,
    error_backoff: Duration,
}

impl<H: TaskHandler> Consumer<H> {
    pub fn new(broker: Arc<dyn Broker>, family: QueueFamily, handler: H) -> Self {
        Self {
            broker,
            family,
            handler,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn family(&self) -> &QueueFamily {
        &self.family
    }

    /// Run until `shutdown` fires or the delivery stream fails.
    ///
    /// Cancellation is observed between deliveries; a delivery already being handled
    /// is finished first. A delivery that could not be settled (retry copy or ack
    /// failed) is left unacknowledged for redelivery and the loop carries on after
    /// a short pause.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), QueueError> {
        self.broker.declare_family(&self.family).await?;
        let mut deliveries = self.broker.consume(&self.family.main_queue()).await?;
        info!(family = self.family.name, "consumer started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(family = self.family.name, "consumer stopping");
                    return Ok(());
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if let Err(e) = self.process(delivery).await {
                        error!(
                            family = self.family.name,
                            error = %e,
                            "delivery not settled, leaving it for redelivery"
                        );
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => {
                                info!(family = self.family.name, "consumer stopping");
                                return Ok(());
                            }
                            _ = tokio::time::sleep(self.error_backoff) => {}
                        }
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(QueueError::Broker(format!(
                        "delivery stream for {} closed",
                        self.family.name
                    )))
                }
            }
        }
    }

    /// Handle one delivery. The original is acked only after any retry/DLQ copy
    /// has been published.
    pub async fn process(&self, delivery: Delivery) -> Result<Outcome, QueueError> {
        let started = Instant::now();

        let mut event = match QueueEvent::from_slice(delivery.body()) {
            Ok(event) => event,
            Err(e) => {
                warn!(family = self.family.name, error = %e, "dropping undecodable message");
                delivery.ack().await?;
                return Ok(self.record(Outcome::Dropped, started));
            }
        };

        let task = match event.decode::<H::Task>() {
            Ok(task) => task,
            Err(e) => {
                warn!(
                    family = self.family.name,
                    task = %event.task,
                    error = %e,
                    "dropping unknown or malformed task"
                );
                delivery.ack().await?;
                return Ok(self.record(Outcome::Dropped, started));
            }
        };

        let err = match self.handler.handle(task).await {
            Ok(()) => {
                delivery.ack().await?;
                return Ok(self.record(Outcome::Acked, started));
            }
            Err(err) => err,
        };

        // the counter comes off the wire; never let it wrap back under the budget
        event.retries = event.retries.saturating_add(1);
        let (queue, outcome) = if event.retries > self.family.max_retries {
            error!(
                family = self.family.name,
                task = %event.task,
                retries = event.retries,
                error = %err,
                "task exhausted retries, moving to dead-letter queue"
            );
            (
                self.family.dead_letter_queue(),
                Outcome::DeadLettered {
                    retries: event.retries,
                },
            )
        } else {
            warn!(
                family = self.family.name,
                task = %event.task,
                retries = event.retries,
                error = %err,
                "task failed, scheduling retry"
            );
            (
                self.family.retry_queue(),
                Outcome::Retried {
                    retries: event.retries,
                },
            )
        };

        self.broker.publish(&queue, event.to_vec()?).await?;
        delivery.ack().await?;
        Ok(self.record(outcome, started))
    }

    fn record(&self, outcome: Outcome, started: Instant) -> Outcome {
        metrics::counter!(
            "portier_tasks_total",
            "family" => self.family.name,
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!("portier_task_duration_seconds", "family" => self.family.name)
            .record(started.elapsed().as_secs_f64());
        outcome
    }
}
