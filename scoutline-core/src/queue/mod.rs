//! Queue ingestion: message sources, type-based dispatch and the consumer
//! loop with its acknowledgment protocol.

mod dispatcher;

pub use dispatcher::{Dispatch, Dispatcher, JobMessage, JobMessageHandler, MessageHandler};

use async_trait::async_trait;
use std::{fmt, future::Future};
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};

/// One message handed out by a [`MessageSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    /// Broker-reported delivery count, when the broker tracks one.
    pub delivery_count: Option<u32>,
}

/// A broker connection delivering messages with manual acknowledgment.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<Delivery>>;

    async fn ack(&mut self, tag: u64) -> Result<()>;

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<()>;

    /// Stop consuming and release the channel and connection.
    async fn close(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    Connected,
    Consuming,
    ShuttingDown,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConsumerState::Connected => "connected",
            ConsumerState::Consuming => "consuming",
            ConsumerState::ShuttingDown => "shutting_down",
        };
        f.write_str(label)
    }
}

/// Counters reported when the consumer stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub requeued: u64,
    pub rejected: u64,
}

pub struct QueueConsumer<S> {
    source: S,
    dispatcher: Dispatcher,
    state: ConsumerState,
    max_redeliveries: Option<u32>,
    stats: ConsumerStats,
}

impl<S> fmt::Debug for QueueConsumer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("state", &self.state)
            .field("max_redeliveries", &self.max_redeliveries)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<S: MessageSource> QueueConsumer<S> {
    pub fn new(source: S, dispatcher: Dispatcher) -> Self {
        Self {
            source,
            dispatcher,
            state: ConsumerState::Connected,
            max_redeliveries: None,
            stats: ConsumerStats::default(),
        }
    }

    /// Reject failing messages without requeue once the broker reports this
    /// many deliveries.
    pub fn with_max_redeliveries(mut self, max_redeliveries: Option<u32>) -> Self {
        self.max_redeliveries = max_redeliveries;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Consume until `shutdown` resolves or the source ends. One message is
    /// handled at a time. Returns `Ok` only for a requested shutdown; the
    /// source is closed on every exit.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<ConsumerStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.state = ConsumerState::Consuming;
        info!(target: "orchestrator::queue", "consumer started, waiting for messages");

        let failure = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(target: "orchestrator::queue", "shutdown requested, closing consumer");
                    self.stop().await;
                    return Ok(self.stats);
                }
                next = self.source.recv() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(err) = self.handle(delivery).await {
                            error!(target: "orchestrator::queue", error = %err, "failed to settle message");
                            break err;
                        }
                    }
                    Some(Err(err)) => {
                        error!(target: "orchestrator::queue", error = %err, "message stream failed");
                        break err;
                    }
                    None => {
                        error!(target: "orchestrator::queue", "message stream closed unexpectedly");
                        break OrchestratorError::Queue(
                            "message stream closed unexpectedly".to_string(),
                        );
                    }
                },
            }
        };

        self.stop().await;
        Err(failure)
    }

    /// Release the source and report the final counters.
    async fn stop(&mut self) {
        self.state = ConsumerState::ShuttingDown;
        if let Err(err) = self.source.close().await {
            warn!(target: "orchestrator::queue", error = %err, "failed to close message source cleanly");
        }
        info!(
            target: "orchestrator::queue",
            acked = self.stats.acked,
            requeued = self.stats.requeued,
            rejected = self.stats.rejected,
            "consumer stopped"
        );
    }

    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        debug!(
            target: "orchestrator::queue",
            tag = delivery.tag,
            bytes = delivery.body.len(),
            delivery_count = ?delivery.delivery_count,
            "message received"
        );

        match self.dispatcher.dispatch(&delivery.body).await {
            Ok(_) => {
                self.source.ack(delivery.tag).await?;
                self.stats.acked += 1;
            }
            Err(err) if self.redeliveries_exhausted(&delivery) => {
                error!(
                    target: "orchestrator::queue",
                    tag = delivery.tag,
                    delivery_count = ?delivery.delivery_count,
                    error = %err,
                    "message failed too often, rejecting without requeue"
                );
                self.source.nack(delivery.tag, false).await?;
                self.stats.rejected += 1;
            }
            Err(err) => {
                error!(target: "orchestrator::queue", tag = delivery.tag, error = %err, "message failed, requeueing");
                self.source.nack(delivery.tag, true).await?;
                self.stats.requeued += 1;
            }
        }
        Ok(())
    }

    fn redeliveries_exhausted(&self, delivery: &Delivery) -> bool {
        match (self.max_redeliveries, delivery.delivery_count) {
            (Some(max), Some(count)) => count >= max,
            _ => false,
        }
    }
}
