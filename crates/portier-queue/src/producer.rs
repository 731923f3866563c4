use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use crate::{Broker, QueueError, QueueEvent, QueueFamily};

/// Publishes tasks to the main queue of a family.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Declare the family topology and publish `task` with `retries = 0`.
    pub async fn try_publish<T: Serialize + Sync>(
        &self,
        family: &QueueFamily,
        task: &T,
    ) -> Result<(), QueueError> {
        let event = QueueEvent::from_task(task)?;
        let body = event.to_vec()?;

        self.broker.declare_family(family).await?;
        self.broker.publish(&family.main_queue(), body).await?;

        metrics::counter!("portier_tasks_published_total", "family" => family.name).increment(1);
        debug!(family = family.name, task = %event.task, "task published");
        Ok(())
    }

    /// Fire-and-forget publish. Failures are logged and never reach the caller.
    pub async fn publish<T: Serialize + Sync>(&self, family: &QueueFamily, task: &T) {
        if let Err(e) = self.try_publish(family, task).await {
            error!(family = family.name, error = %e, "failed to publish task");
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}
