//! Order consumer with automatic reconnection.
//!
//! The [`Worker`] runs a subscribe-process-reconnect loop in its own tokio task:
//!
//! ```text
//! loop {
//!     subscribe:
//!         acquire channel, declare queue, start consumer
//!     process:
//!         loop {
//!             decode → upsert into store → ack
//!             (undecodable → reject, store failure → requeue and pause)
//!             stop on shutdown signal
//!         }
//!     stream ended:
//!         invalidate the channel if it died, cancel the consumer if it did not
//!         back off unless the subscription was healthy, resubscribe
//! }
//! ```
//!
//! # States
//!
//! ```text
//! Stopped → Starting → Subscribed ⇄ Processing
//!                          ↓   ↑
//!                      Reconnecting
//! ```
//!
//! The current state is published on a `watch` channel; see [`WorkerHandle::state`].
//!
//! # Delivery guarantees
//!
//! A delivery is acked only after the store accepted the order, so a crash between
//! upsert and ack leads to a redelivery, which the idempotent upsert absorbs.

use crate::connection::{ChannelLease, ConnectionManager};
use crate::metrics::PipelineMetrics;
use crate::retry::RetryPolicy;
use futures::StreamExt;
use order_relay_core::broker::{
    BrokerChannel, BrokerError, ConnectionError, Connector, Delivery, DeliveryStream, QueueSpec,
};
use order_relay_core::codec;
use order_relay_core::store::OrderStore;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Lifecycle state of the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Not running (before spawn or after shutdown)
    Stopped,
    /// First subscription attempt in progress
    Starting,
    /// Consumer active, waiting for deliveries
    Subscribed,
    /// Handling a delivery
    Processing,
    /// Subscription lost, backing off before resubscribing
    Reconnecting,
}

impl WorkerState {
    /// Lowercase name used in logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Subscribed => "subscribed",
            Self::Processing => "processing",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether the worker is attached to the queue.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Subscribed | Self::Processing)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker settings.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Queue to consume (declared on every subscription)
    pub queue: QueueSpec,
    /// Consumer tag sent to the broker
    pub consumer_tag: String,
    /// Maximum unacknowledged deliveries in flight
    pub prefetch: u16,
    /// Upper bound for handling one delivery
    pub message_timeout: Duration,
    /// Delay between failed subscription attempts, and the pause after each
    /// consecutive requeue
    pub backoff: RetryPolicy,
}

impl WorkerConfig {
    /// Defaults: tag `order-relay-worker`, prefetch 16, 10s message timeout, default backoff.
    #[must_use]
    pub fn new(queue: QueueSpec) -> Self {
        Self {
            queue,
            consumer_tag: "order-relay-worker".to_string(),
            prefetch: 16,
            message_timeout: Duration::from_secs(10),
            backoff: RetryPolicy::default(),
        }
    }

    /// Set the prefetch count.
    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Set the per-message timeout.
    #[must_use]
    pub const fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Set the reconnect backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the consumer tag.
    #[must_use]
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }
}

#[derive(Error, Debug)]
enum SubscribeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// A subscription that lasted this long is healthy even if the queue stayed empty.
const STABLE_SUBSCRIPTION: Duration = Duration::from_secs(5);

/// Why the processing loop returned.
enum StreamExit {
    Shutdown,
    Ended { delivered: bool },
}

/// Outcome of handling a single delivery.
#[derive(Debug, PartialEq, Eq)]
enum Handled {
    Acked,
    Rejected,
    Requeued,
}

/// Consumes the order queue into an [`OrderStore`].
///
/// # Example
///
/// ```
/// use order_relay_runtime::{ConnectionManager, Worker, WorkerConfig, WorkerState};
/// use order_relay_projections::KitchenOrderStore;
/// use order_relay_core::QueueSpec;
/// use order_relay_testing::InMemoryBroker;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = Arc::new(ConnectionManager::new(InMemoryBroker::new()));
/// let store = Arc::new(KitchenOrderStore::new());
///
/// let handle = Worker::new(manager, store, WorkerConfig::new(QueueSpec::durable("orders"))).spawn();
/// handle.state_receiver().wait_for(|s| s.is_ready()).await?;
///
/// handle.stop(std::time::Duration::from_secs(5)).await;
/// # Ok(())
/// # }
/// ```
pub struct Worker<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    store: Arc<dyn OrderStore>,
    config: WorkerConfig,
}

impl<C: Connector + 'static> Worker<C> {
    /// Create a worker; nothing happens until [`spawn`](Self::spawn).
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager<C>>,
        store: Arc<dyn OrderStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            manager,
            store,
            config,
        }
    }

    /// Start the consume loop as a background task.
    #[must_use]
    pub fn spawn(self) -> WorkerHandle {
        let (state_tx, state_rx) = watch::channel(WorkerState::Stopped);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            self.run(&state_tx, shutdown_rx).await;
        });

        WorkerHandle {
            state: state_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(&self, state: &watch::Sender<WorkerState>, mut shutdown: broadcast::Receiver<()>) {
        let queue = self.config.queue.name.as_str();
        tracing::info!(queue = %queue, broker = %self.manager.target(), "Worker started");

        let mut attempt: u32 = 0;
        let mut subscribed_once = false;

        loop {
            state.send_replace(if subscribed_once || attempt > 0 {
                WorkerState::Reconnecting
            } else {
                WorkerState::Starting
            });

            let subscription = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                result = self.subscribe() => result,
            };

            let failure = match subscription {
                Ok((lease, mut stream)) => {
                    if subscribed_once {
                        PipelineMetrics::record_reconnect();
                    }
                    subscribed_once = true;
                    state.send_replace(WorkerState::Subscribed);
                    tracing::info!(
                        queue = %queue,
                        generation = lease.generation(),
                        prefetch = self.config.prefetch,
                        "Worker subscribed"
                    );

                    let subscribed_at = Instant::now();
                    match self.process_stream(&mut stream, state, &mut shutdown).await {
                        StreamExit::Shutdown => {
                            if let Err(e) = lease.cancel(&self.config.consumer_tag).await {
                                tracing::warn!(queue = %queue, error = %e, "Consumer cancel failed");
                            }
                            break;
                        },
                        StreamExit::Ended { delivered } => {
                            if lease.is_open() {
                                // Resubscribe on the same channel; the old consumer may linger
                                if let Err(e) = lease.cancel(&self.config.consumer_tag).await {
                                    tracing::debug!(queue = %queue, error = %e, "Stale consumer cancel failed");
                                }
                            } else {
                                self.manager.invalidate(lease.generation()).await;
                            }

                            if delivered || subscribed_at.elapsed() >= STABLE_SUBSCRIPTION {
                                attempt = 0;
                                tracing::warn!(
                                    queue = %queue,
                                    generation = lease.generation(),
                                    "Delivery stream ended, resubscribing"
                                );
                                continue;
                            }
                            "delivery stream ended before any delivery".to_string()
                        },
                    }
                },
                Err(e) => e.to_string(),
            };

            state.send_replace(WorkerState::Reconnecting);
            let delay = self.config.backoff.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tracing::warn!(
                queue = %queue,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "Worker subscription failed, retrying"
            );

            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {},
            }
        }

        state.send_replace(WorkerState::Stopped);
        tracing::info!(queue = %queue, "Worker stopped");
    }

    async fn subscribe(&self) -> Result<(ChannelLease<C::Channel>, DeliveryStream), SubscribeError> {
        let lease = self.manager.acquire_channel().await?;

        let stream = async {
            lease.declare_queue(&self.config.queue).await?;
            lease
                .consume(
                    &self.config.queue.name,
                    &self.config.consumer_tag,
                    self.config.prefetch,
                )
                .await
        }
        .await;

        match stream {
            Ok(stream) => Ok((lease, stream)),
            Err(e) => {
                if e.is_channel_fatal() {
                    self.manager.invalidate(lease.generation()).await;
                }
                Err(e.into())
            },
        }
    }

    async fn process_stream(
        &self,
        stream: &mut DeliveryStream,
        state: &watch::Sender<WorkerState>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> StreamExit {
        let mut delivered = false;
        let mut requeues: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Worker received shutdown signal");
                    return StreamExit::Shutdown;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        delivered = true;
                        state.send_replace(WorkerState::Processing);
                        let outcome = self.handle(delivery).await;
                        state.send_replace(WorkerState::Subscribed);

                        match outcome {
                            Handled::Acked => requeues = 0,
                            Handled::Rejected => {},
                            Handled::Requeued => {
                                // Pause before the requeued message comes back
                                let delay = self.config.backoff.delay_for_attempt(requeues);
                                requeues = requeues.saturating_add(1);
                                tracing::debug!(
                                    requeues,
                                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                    "Pausing consumption after requeue"
                                );
                                tokio::select! {
                                    biased;
                                    _ = shutdown.recv() => {
                                        tracing::info!("Worker received shutdown signal");
                                        return StreamExit::Shutdown;
                                    }
                                    () = tokio::time::sleep(delay) => {},
                                }
                            },
                        }
                    },
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Error receiving delivery");
                        return StreamExit::Ended { delivered };
                    },
                    None => return StreamExit::Ended { delivered },
                },
            }
        }
    }

    async fn handle(&self, delivery: Delivery) -> Handled {
        let tag = delivery.delivery_tag;
        let redelivered = delivery.redelivered;

        let order = match codec::decode(&delivery.body) {
            Ok(order) => order,
            Err(e) => {
                PipelineMetrics::record_decode_failure();
                tracing::warn!(
                    delivery_tag = tag,
                    redelivered,
                    error = %e,
                    "Rejecting undecodable message"
                );
                if let Err(e) = delivery.reject(false).await {
                    tracing::warn!(delivery_tag = tag, error = %e, "Reject failed");
                }
                return Handled::Rejected;
            },
        };

        let order_id = order.id().clone();
        let written = tokio::time::timeout(self.config.message_timeout, self.store.upsert(order)).await;

        let failure = match written {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "store write timed out after {}ms",
                self.config.message_timeout.as_millis()
            )),
        };

        if let Some(reason) = failure {
            PipelineMetrics::record_store_failure();
            tracing::error!(
                order_id = %order_id,
                delivery_tag = tag,
                error = %reason,
                "Store write failed, requeueing"
            );
            if let Err(e) = delivery.reject(true).await {
                tracing::warn!(order_id = %order_id, error = %e, "Requeue failed");
            }
            return Handled::Requeued;
        }

        if let Err(e) = delivery.ack().await {
            // Upsert is idempotent; the broker will redeliver
            tracing::warn!(order_id = %order_id, error = %e, "Ack failed after upsert");
            return Handled::Requeued;
        }

        PipelineMetrics::record_consumed();
        if let Ok(count) = self.store.count().await {
            PipelineMetrics::record_kitchen_orders(count);
        }
        tracing::info!(order_id = %order_id, delivery_tag = tag, redelivered, "Order delivered to kitchen");
        Handled::Acked
    }
}

impl<C: Connector> fmt::Debug for Worker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Control handle for a spawned [`Worker`].
#[derive(Debug)]
pub struct WorkerHandle {
    state: watch::Receiver<WorkerState>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Signal shutdown and wait up to `grace` for the in-flight delivery to finish.
    ///
    /// The task is aborted if it does not stop in time.
    pub async fn stop(self, grace: Duration) {
        // Err only if the task already exited
        let _ = self.shutdown.send(());

        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::error!(error = %e, "Worker task failed"),
            Err(_) => {
                tracing::warn!(grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX), "Worker did not stop in time, aborting");
                task.abort();
            },
        }
    }
}
