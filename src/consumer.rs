//! Queue ingestion
//!
//! Pulls log submissions off the durable queue and hands them to the
//! router. A delivery is acknowledged once it has been routed (stored or
//! deliberately dropped). A delivery that fails to decode or route is put
//! back on the queue until it has been attempted `retry_limit` times, after
//! which it is rejected to the dead-letter queue.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RouterConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::queue::{Delivery, MessageQueue, QueueTopology, DEFAULT_QUEUE_NAME};
use crate::record::LogSubmission;
use crate::router::{LogRouter, RouteOutcome};

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Positively acknowledged
    Acked,
    /// Negatively acknowledged and put back on the queue
    Requeued,
    /// Negatively acknowledged without requeue
    DeadLettered,
}

/// Consumes the ingestion queue
pub struct IngestionConsumer {
    queue: Arc<dyn MessageQueue>,
    router: Arc<LogRouter>,
    topology: QueueTopology,
    retry_limit: u32,
    concurrency: usize,
    metrics: Arc<MetricsCollector>,
}

impl IngestionConsumer {
    /// Create a consumer on the default queue with default limits
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        router: Arc<LogRouter>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue,
            router,
            topology: QueueTopology::for_queue(DEFAULT_QUEUE_NAME),
            retry_limit: 3,
            concurrency: 8,
            metrics,
        }
    }

    /// Create a consumer from the router configuration
    pub fn from_config(
        config: &RouterConfig,
        queue: Arc<dyn MessageQueue>,
        router: Arc<LogRouter>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::new(queue, router, metrics)
            .with_topology(config.topology())
            .with_retry_limit(config.retry_limit)
            .with_concurrency(config.consumer_concurrency)
    }

    pub fn with_topology(mut self, topology: QueueTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set how many times a failing delivery is attempted; at least 1
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }

    /// Set how many deliveries are processed at once; at least 1
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    /// Declare the queue, dead-letter exchange and dead-letter queue
    pub async fn declare(&self) -> Result<()> {
        self.queue.declare(&self.topology).await?;
        debug!(
            queue = %self.topology.queue,
            dead_letter_queue = %self.topology.dead_letter_queue,
            "Declared ingestion topology"
        );
        Ok(())
    }

    /// Decode, route and settle one delivery
    pub async fn handle(&self, delivery: Delivery) -> Result<Disposition> {
        let routed = match LogSubmission::decode(&delivery.payload) {
            Ok(submission) => self.router.route_log(submission).await,
            Err(e) => Err(e),
        };

        match routed {
            Ok(outcome) => {
                self.queue.ack(delivery.tag).await?;
                self.metrics.increment_acked();
                if let RouteOutcome::Dropped(reason) = outcome {
                    debug!(tag = delivery.tag, reason = reason.name(), "Acknowledged dropped log");
                }
                Ok(Disposition::Acked)
            }
            Err(e) if delivery.attempt >= self.retry_limit => {
                error!(
                    tag = delivery.tag,
                    attempt = delivery.attempt,
                    error = %e,
                    "Delivery exhausted its retries, dead-lettering"
                );
                self.queue.nack(delivery.tag, false).await?;
                self.metrics.increment_dead_lettered();
                Ok(Disposition::DeadLettered)
            }
            Err(e) => {
                warn!(
                    tag = delivery.tag,
                    attempt = delivery.attempt,
                    error = %e,
                    "Failed to process delivery, requeueing"
                );
                self.queue.nack(delivery.tag, true).await?;
                self.metrics.increment_requeued();
                Ok(Disposition::Requeued)
            }
        }
    }

    /// Consume until cancelled or the queue closes.
    ///
    /// At most `concurrency` deliveries are in flight. On cancellation no
    /// new delivery is taken and in-flight ones are allowed to settle.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut failure = None;

        info!(
            queue = %self.topology.queue,
            concurrency = self.concurrency,
            retry_limit = self.retry_limit,
            "Ingestion consumer started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Delivery task failed");
                    }
                }
                permit = semaphore.clone().acquire_owned() => {
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            failure = Some(Error::queue("Consumer permits closed"));
                            break;
                        }
                    };

                    let received = tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = self.queue.receive(&self.topology.queue) => received,
                    };

                    let delivery = match received {
                        Ok(Some(delivery)) => delivery,
                        Ok(None) => {
                            info!("Ingestion queue closed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to receive from ingestion queue");
                            failure = Some(e);
                            break;
                        }
                    };

                    let consumer = self.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let tag = delivery.tag;
                        if let Err(e) = consumer.handle(delivery).await {
                            error!(tag, error = %e, "Failed to settle delivery");
                        }
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Delivery task failed");
            }
        }
        info!(queue = %self.topology.queue, "Ingestion consumer stopped");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
