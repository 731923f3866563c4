//! AMQP 0-9-1 broker (RabbitMQ).
//!
//! All queues are durable and addressed through the default exchange. Retry delays
//! are a per-message TTL on `F_retry` whose dead-letter routing key is `F`, so the
//! broker itself moves a message back once its delay elapses.
//!
//! Publishes go over one shared channel in confirm mode. Each consumer gets its own
//! channel with prefetch 1.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use portier_queue::{Acker, Broker, Delivery, DeliveryStream, QueueError, QueueSpec};
use tracing::{debug, info, warn};

const PERSISTENT: u8 = 2;

fn broker_err(e: lapin::Error) -> QueueError {
    QueueError::Broker(e.to_string())
}

/// Broker backed by a RabbitMQ connection.
pub struct AmqpBroker {
    connection: Connection,
    publisher: Channel,
}

impl AmqpBroker {
    /// Connect and open the publishing channel. `uri` is an `amqp://` or `amqps://` URL.
    pub async fn connect(uri: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(broker_err)?;
        let publisher = connection.create_channel().await.map_err(broker_err)?;
        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(broker_err)?;
        info!("connected to AMQP broker");
        Ok(Self {
            connection,
            publisher,
        })
    }

    pub async fn close(&self) -> Result<(), QueueError> {
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(broker_err)
    }
}

/// Translate a queue declaration into x-arguments.
fn queue_arguments(spec: &QueueSpec) -> Result<FieldTable, QueueError> {
    let mut args = FieldTable::default();
    if let Some(target) = &spec.dead_letter_to {
        args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from("")),
        );
        args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(target.as_str())),
        );
    }
    if let Some(ttl) = spec.message_ttl {
        let millis = i32::try_from(ttl.as_millis()).map_err(|_| {
            QueueError::Broker(format!("message TTL for {} out of range", spec.name))
        })?;
        args.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongInt(millis),
        );
    }
    Ok(args)
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
    settled: bool,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&mut self) -> Result<(), QueueError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(broker_err)?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for AmqpAcker {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Hand the message back right away instead of waiting for the channel to close.
        let acker = self.acker.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let options = BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                };
                if let Err(e) = acker.nack(options).await {
                    warn!(error = %e, "failed to requeue unacked delivery");
                }
            });
        }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        self.publisher
            .queue_declare(&spec.name, options, queue_arguments(spec)?)
            .await
            .map_err(broker_err)?;
        debug!(queue = %spec.name, "queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(PERSISTENT);
        let confirmation = self
            .publisher
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(broker_err)?
            .await
            .map_err(broker_err)?;
        if confirmation.is_nack() {
            return Err(QueueError::Broker(format!(
                "broker rejected publish to {}",
                queue
            )));
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, QueueError> {
        let channel = self.connection.create_channel().await.map_err(broker_err)?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(broker_err)?;
        let consumer = channel
            .basic_consume(
                queue,
                &format!("portier-{}-{}", queue, std::process::id()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_err)?;
        info!(queue, "consuming");

        // The stream owns the channel so it stays open as long as someone consumes.
        let stream = consumer.map(move |delivery| -> Result<Delivery, QueueError> {
            let _channel = &channel;
            let delivery = delivery.map_err(broker_err)?;
            let acker = AmqpAcker {
                acker: delivery.acker,
                settled: false,
            };
            Ok(Delivery::new(delivery.data, Box::new(acker)))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portier_queue::QueueFamily;
    use std::time::Duration;

    fn arg<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        table.inner().get(&ShortString::from(key))
    }

    #[test]
    fn main_queue_dead_letters_to_dlq() {
        let family = QueueFamily::new("email_tasks", 3, Duration::from_millis(5000));
        let [main, _, _] = family.topology();
        let args = queue_arguments(&main).unwrap();

        assert_eq!(
            arg(&args, "x-dead-letter-routing-key"),
            Some(&AMQPValue::LongString(LongString::from("email_tasks_dlq")))
        );
        assert_eq!(
            arg(&args, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString(LongString::from("")))
        );
        assert!(arg(&args, "x-message-ttl").is_none());
    }

    #[test]
    fn retry_queue_has_ttl_and_routes_back() {
        let family = QueueFamily::new("report_tasks", 5, Duration::from_millis(10000));
        let [_, retry, _] = family.topology();
        let args = queue_arguments(&retry).unwrap();

        assert_eq!(arg(&args, "x-message-ttl"), Some(&AMQPValue::LongInt(10000)));
        assert_eq!(
            arg(&args, "x-dead-letter-routing-key"),
            Some(&AMQPValue::LongString(LongString::from("report_tasks")))
        );
    }

    #[test]
    fn dlq_has_no_arguments() {
        let family = QueueFamily::new("email_tasks", 3, Duration::from_millis(5000));
        let [_, _, dlq] = family.topology();
        assert!(queue_arguments(&dlq).unwrap().inner().is_empty());
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let spec = QueueSpec {
            name: "slow_retry".into(),
            dead_letter_to: Some("slow".into()),
            message_ttl: Some(Duration::from_secs(60 * 60 * 24 * 365)),
        };
        assert!(queue_arguments(&spec).is_err());
    }
}
