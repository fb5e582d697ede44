//! RabbitMQ message source.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
};
use scoutline_core::{
    OrchestratorError, Result,
    queue::{Delivery, MessageSource},
};
use std::{fmt, future::Future};
use tracing::{debug, info, warn};

const CONSUMER_TAG: &str = "scoutline-orchestrator";
const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

/// Consumes one durable queue with manual acknowledgment and a prefetch of
/// one, so the broker never hands out a second message while the first is
/// still being registered.
pub struct AmqpSource {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    queue: String,
    closed: bool,
}

impl fmt::Debug for AmqpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpSource")
            .field("queue", &self.queue)
            .field("connected", &self.connection.status().connected())
            .field("closed", &self.closed)
            .finish()
    }
}

fn queue_error(context: &str, err: lapin::Error) -> OrchestratorError {
    OrchestratorError::Queue(format!("{context}: {err}"))
}

impl AmqpSource {
    pub async fn connect(url: &str, queue: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| queue_error("failed to connect to broker", e))?;

        // Closing the connection also closes any channel opened on it.
        let (channel, consumer) = release_on_error(
            open_consumer(&connection, queue).await,
            connection.close(200, "consumer setup failed"),
        )
        .await?;

        info!(target: "orchestrator::queue", queue, "AMQP consumer registered");

        Ok(Self {
            connection,
            channel,
            consumer,
            queue: queue.to_string(),
            closed: false,
        })
    }
}

async fn open_consumer(connection: &Connection, queue: &str) -> Result<(Channel, Consumer)> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| queue_error("failed to open channel", e))?;

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| queue_error("failed to declare queue", e))?;

    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .map_err(|e| queue_error("failed to set prefetch", e))?;

    let consumer = channel
        .basic_consume(
            queue,
            CONSUMER_TAG,
            BasicConsumeOptions {
                no_ack: false,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| queue_error("failed to start consumer", e))?;

    Ok((channel, consumer))
}

/// Await `release` only when `result` failed. The original error is kept.
async fn release_on_error<T, F>(result: Result<T>, release: F) -> Result<T>
where
    F: Future<Output = lapin::Result<()>>,
{
    if let Err(err) = &result {
        warn!(target: "orchestrator::queue", error = %err, "releasing broker connection after setup failure");
        if let Err(close_err) = release.await {
            warn!(target: "orchestrator::queue", error = %close_err, "failed to release broker connection");
        }
    }
    result
}

/// Deliveries so far including this one. Quorum queues report previous
/// deliveries in `x-delivery-count`; classic queues only flag redelivery.
fn delivery_count(headers: Option<&FieldTable>, redelivered: bool) -> Option<u32> {
    let previous = headers
        .and_then(|table| {
            table
                .inner()
                .get(&ShortString::from(DELIVERY_COUNT_HEADER))
        })
        .and_then(|value| match value {
            AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
            AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
            AMQPValue::LongUInt(v) => Some(*v),
            AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
            AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
            _ => None,
        });

    match previous {
        Some(count) => Some(count.saturating_add(1)),
        None if !redelivered => Some(1),
        None => None,
    }
}

#[async_trait]
impl MessageSource for AmqpSource {
    async fn recv(&mut self) -> Option<Result<Delivery>> {
        let next = self.consumer.next().await?;
        Some(
            next.map(|delivery| Delivery {
                tag: delivery.delivery_tag,
                delivery_count: delivery_count(
                    delivery.properties.headers().as_ref(),
                    delivery.redelivered,
                ),
                body: delivery.data,
            })
            .map_err(|e| queue_error("delivery failed", e)),
        )
    }

    async fn ack(&mut self, tag: u64) -> Result<()> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| queue_error("ack failed", e))
    }

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| queue_error("nack failed", e))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(err) = self
            .channel
            .basic_cancel(CONSUMER_TAG, BasicCancelOptions::default())
            .await
        {
            warn!(target: "orchestrator::queue", error = %err, "consumer cancel failed");
        }
        if let Err(err) = self.channel.close(200, "shutdown").await {
            warn!(target: "orchestrator::queue", error = %err, "channel close failed");
        }
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| queue_error("connection close failed", e))?;

        debug!(target: "orchestrator::queue", queue = %self.queue, "AMQP connection closed");
        Ok(())
    }
}
