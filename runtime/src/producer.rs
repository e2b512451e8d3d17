//! Durable order publishing.

use crate::connection::ConnectionManager;
use crate::metrics::PipelineMetrics;
use order_relay_core::broker::{BoxFuture, BrokerChannel, Connector, PublishProperties, QueueSpec};
use order_relay_core::publisher::{OrderPublisher, PublishError};
use order_relay_core::{Order, codec};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Publishes orders to the durable order queue.
///
/// The queue is declared on every new channel generation before the first publish on
/// it, so it does not matter whether the producer or the worker starts first.
///
/// Messages are persistent JSON with `message-id` set to the order id. `publish` resolves
/// only after the broker confirmed the message.
///
/// # Example
///
/// ```
/// use order_relay_runtime::{ConnectionManager, Producer};
/// use order_relay_core::{OrderPublisher, QueueSpec};
/// use order_relay_testing::{InMemoryBroker, fixtures};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let manager = Arc::new(ConnectionManager::new(broker.clone()));
/// let producer = Producer::new(manager, QueueSpec::durable("orders"));
///
/// producer.publish(&fixtures::sample_order()).await?;
/// assert_eq!(broker.queue_depth("orders"), 1);
/// # Ok(())
/// # }
/// ```
pub struct Producer<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    queue: QueueSpec,
    declared_generation: AtomicU64,
}

impl<C: Connector> Producer<C> {
    /// Create a producer for `queue`.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager<C>>, queue: QueueSpec) -> Self {
        Self {
            manager,
            queue,
            declared_generation: AtomicU64::new(0),
        }
    }

    /// The queue orders are published to.
    #[must_use]
    pub const fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    async fn publish_order(&self, order: &Order) -> Result<(), PublishError> {
        let queue = self.queue.name.as_str();
        let lease = self.manager.acquire_channel().await?;
        let generation = lease.generation();

        if self.declared_generation.load(Ordering::SeqCst) != generation {
            if let Err(e) = lease.declare_queue(&self.queue).await {
                if e.is_channel_fatal() {
                    self.manager.invalidate(generation).await;
                }
                return Err(PublishError::from_broker(order.id(), queue, e));
            }
            self.declared_generation.store(generation, Ordering::SeqCst);
            tracing::debug!(queue = %queue, generation, "Order queue declared");
        }

        let payload = codec::encode(order);
        let properties = PublishProperties::persistent_json(order.id().as_str());

        match lease.publish(queue, &payload, &properties).await {
            Ok(()) => {
                tracing::info!(
                    order_id = %order.id(),
                    queue = %queue,
                    generation,
                    bytes = payload.len(),
                    "Order published"
                );
                Ok(())
            },
            Err(e) => {
                if e.is_channel_fatal() {
                    self.manager.invalidate(generation).await;
                }
                Err(PublishError::from_broker(order.id(), queue, e))
            },
        }
    }
}

impl<C: Connector> OrderPublisher for Producer<C> {
    fn publish<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let result = self.publish_order(order).await;
            match &result {
                Ok(()) => PipelineMetrics::record_published(),
                Err(e) => {
                    PipelineMetrics::record_publish_failure();
                    tracing::error!(order_id = %order.id(), error = %e, "Order publish failed");
                },
            }
            result
        })
    }
}

impl<C: Connector> std::fmt::Debug for Producer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("queue", &self.queue)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
