//! In-memory broker for fast, deterministic pipeline tests.
//!
//! [`InMemoryBroker`] behaves like a single AMQP node closely enough to exercise the
//! producer, the worker and the connection manager without RabbitMQ:
//!
//! - queues must be declared before publishing (publishing to an unknown queue is rejected)
//! - each queue delivers to at most one consumer, in FIFO order
//! - deliveries stay unacked until settled; closing a channel requeues its unacked
//!   deliveries with `redelivered = true`
//! - `reject(requeue = false)` moves the message to the queue's dead-letter target, if any
//!
//! Failure injection ([`fail_next_connects`](InMemoryBroker::fail_next_connects),
//! [`reject_publishes`](InMemoryBroker::reject_publishes),
//! [`drop_all_channels`](InMemoryBroker::drop_all_channels)) and inspection helpers make
//! reconnect and at-least-once behavior observable. Prefetch is accepted but not enforced.

use order_relay_core::broker::{
    Acknowledger, BoxFuture, BrokerChannel, BrokerError, ConnectionError, Connector, Delivery,
    DeliveryStream, PublishProperties, QueueSpec,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Debug)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
    properties: PublishProperties,
}

struct ConsumerSlot {
    channel_id: u64,
    tag: String,
    tx: mpsc::UnboundedSender<Result<Delivery, BrokerError>>,
}

#[derive(Default)]
struct QueueState {
    spec: Option<QueueSpec>,
    ready: VecDeque<StoredMessage>,
    consumer: Option<ConsumerSlot>,
}

struct Unacked {
    queue: String,
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Default)]
struct Topology {
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, Unacked>,
    channels: HashMap<u64, Arc<AtomicBool>>,
}

#[derive(Default)]
struct BrokerState {
    topology: Mutex<Topology>,
    connections_opened: AtomicUsize,
    declarations: AtomicUsize,
    published: AtomicUsize,
    next_channel_id: AtomicU64,
    next_delivery_tag: AtomicU64,
    failing_connects: AtomicUsize,
    reject_publishes: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

impl BrokerState {
    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand ready messages of `queue` to its consumer, if any.
    fn dispatch(self: &Arc<Self>, topology: &mut Topology, queue: &str) {
        let Some(state) = topology.queues.get_mut(queue) else {
            return;
        };

        while let Some(consumer) = &state.consumer {
            let Some(message) = state.ready.pop_front() else {
                break;
            };
            let tag = self.next_delivery_tag.fetch_add(1, Ordering::SeqCst) + 1;
            let channel_id = consumer.channel_id;
            let open = topology
                .channels
                .get(&channel_id)
                .cloned()
                .unwrap_or_default();

            let delivery = Delivery::new(
                message.body.clone(),
                tag,
                message.redelivered,
                InMemoryAcker {
                    broker: Arc::downgrade(self),
                    tag,
                    open,
                },
            );

            if consumer.tx.send(Ok(delivery)).is_err() {
                // Receiver dropped: the consumer is gone, keep the message
                state.ready.push_front(message);
                state.consumer = None;
                break;
            }

            topology.unacked.insert(
                tag,
                Unacked {
                    queue: queue.to_string(),
                    channel_id,
                    message,
                },
            );
        }
    }

    fn settle(self: &Arc<Self>, tag: u64, outcome: Settle) -> Result<(), BrokerError> {
        let mut topology = self.topology();
        let Some(unacked) = topology.unacked.remove(&tag) else {
            return Err(BrokerError::AckFailed(format!("unknown delivery tag {tag}")));
        };

        match outcome {
            Settle::Ack => {},
            Settle::Requeue => {
                let queue = unacked.queue.clone();
                let mut message = unacked.message;
                message.redelivered = true;
                topology
                    .queues
                    .entry(queue.clone())
                    .or_default()
                    .ready
                    .push_front(message);
                self.dispatch(&mut topology, &queue);
            },
            Settle::Discard => {
                let dead_letter = topology
                    .queues
                    .get(&unacked.queue)
                    .and_then(|q| q.spec.as_ref())
                    .and_then(|spec| spec.dead_letter.clone());
                if let Some(dlq) = dead_letter {
                    topology
                        .queues
                        .entry(dlq.clone())
                        .or_default()
                        .ready
                        .push_back(unacked.message);
                    self.dispatch(&mut topology, &dlq);
                }
            },
        }
        Ok(())
    }

    fn close_channel(self: &Arc<Self>, channel_id: u64) {
        let mut topology = self.topology();
        if let Some(open) = topology.channels.remove(&channel_id) {
            open.store(false, Ordering::SeqCst);
        }

        // Drop consumers owned by the channel; their streams end
        for state in topology.queues.values_mut() {
            if state
                .consumer
                .as_ref()
                .is_some_and(|c| c.channel_id == channel_id)
            {
                state.consumer = None;
            }
        }

        // Requeue everything the channel had not settled
        let mut orphaned: Vec<(u64, Unacked)> = Vec::new();
        let tags: Vec<u64> = topology
            .unacked
            .iter()
            .filter(|(_, u)| u.channel_id == channel_id)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags {
            if let Some(unacked) = topology.unacked.remove(&tag) {
                orphaned.push((tag, unacked));
            }
        }
        orphaned.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));

        let mut touched = Vec::new();
        for (_, unacked) in orphaned {
            let mut message = unacked.message;
            message.redelivered = true;
            topology
                .queues
                .entry(unacked.queue.clone())
                .or_default()
                .ready
                .push_front(message);
            touched.push(unacked.queue);
        }
        touched.dedup();
        for queue in touched {
            self.dispatch(&mut topology, &queue);
        }
    }
}

enum Settle {
    Ack,
    Requeue,
    Discard,
}

struct InMemoryAcker {
    broker: Weak<BrokerState>,
    tag: u64,
    open: Arc<AtomicBool>,
}

impl InMemoryAcker {
    fn settle(&self, outcome: Settle) -> Result<(), BrokerError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed(
                "delivery belongs to a closed channel".to_string(),
            ));
        }
        let broker = self
            .broker
            .upgrade()
            .ok_or_else(|| BrokerError::ChannelClosed("broker dropped".to_string()))?;
        broker.settle(self.tag, outcome)
    }
}

impl Acknowledger for InMemoryAcker {
    fn ack(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move { self.settle(Settle::Ack) })
    }

    fn reject(&self, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.settle(if requeue {
                Settle::Requeue
            } else {
                Settle::Discard
            })
        })
    }
}

/// In-memory broker node. Cloning shares the node.
///
/// # Example
///
/// ```
/// use order_relay_testing::InMemoryBroker;
/// use order_relay_core::broker::{BrokerChannel, Connector, PublishProperties, QueueSpec};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let channel = broker.connect().await?;
///
/// channel.declare_queue(&QueueSpec::durable("orders")).await?;
/// channel
///     .publish("orders", b"{}", &PublishProperties::persistent_json("o1"))
///     .await?;
///
/// assert_eq!(broker.queue_depth("orders"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState::default()),
        }
    }

    /// Delay every connection attempt, widening the window for concurrent first calls.
    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self
            .state
            .connect_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    /// Make the next `n` connection attempts fail with [`ConnectionError::Unreachable`].
    pub fn fail_next_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Make every publish fail with [`BrokerError::Rejected`] while `reject` is true.
    pub fn reject_publishes(&self, reject: bool) {
        self.state.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Close every open channel, as a broker restart or network partition would.
    ///
    /// Consumers' streams end and unacked deliveries are requeued.
    pub fn drop_all_channels(&self) {
        let ids: Vec<u64> = self.state.topology().channels.keys().copied().collect();
        for id in ids {
            self.state.close_channel(id);
        }
    }

    /// Number of connection + channel pairs ever opened.
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.state.connections_opened.load(Ordering::SeqCst)
    }

    /// Number of channels currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.state.topology().channels.len()
    }

    /// Number of `declare_queue` calls received.
    #[must_use]
    pub fn declarations(&self) -> usize {
        self.state.declarations.load(Ordering::SeqCst)
    }

    /// Number of messages accepted by `publish`.
    #[must_use]
    pub fn published(&self) -> usize {
        self.state.published.load(Ordering::SeqCst)
    }

    /// Whether `queue` has been declared.
    #[must_use]
    pub fn is_declared(&self, queue: &str) -> bool {
        self.state
            .topology()
            .queues
            .get(queue)
            .is_some_and(|q| q.spec.is_some())
    }

    /// Messages waiting in `queue` (not yet delivered).
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .topology()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Bodies waiting in `queue`, oldest first.
    #[must_use]
    pub fn queued_bodies(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .topology()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Properties of the messages waiting in `queue`, oldest first.
    #[must_use]
    pub fn queued_properties(&self, queue: &str) -> Vec<PublishProperties> {
        self.state
            .topology()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.properties.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries handed out but not yet acked or rejected.
    #[must_use]
    pub fn unacked(&self) -> usize {
        self.state.topology().unacked.len()
    }

    /// Put a raw body on `queue` as if another producer had published it.
    ///
    /// The queue is created (undeclared) if needed.
    pub fn inject(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut topology = self.state.topology();
        topology
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(StoredMessage {
                body: body.into(),
                redelivered: false,
                properties: PublishProperties::persistent_json(""),
            });
        self.state.dispatch(&mut topology, queue);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("connections_opened", &self.connections_opened())
            .field("open_channels", &self.open_channels())
            .finish_non_exhaustive()
    }
}

impl Connector for InMemoryBroker {
    type Channel = InMemoryChannel;

    fn connect(&self) -> BoxFuture<'_, Result<Self::Channel, ConnectionError>> {
        Box::pin(async move {
            let delay = *self
                .state
                .connect_delay
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let failing = self.state.failing_connects.load(Ordering::SeqCst);
            if failing > 0 {
                self.state
                    .failing_connects
                    .store(failing - 1, Ordering::SeqCst);
                return Err(ConnectionError::Unreachable {
                    target: self.target(),
                    reason: "connection refused (injected)".to_string(),
                });
            }

            let id = self.state.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1;
            let open = Arc::new(AtomicBool::new(true));
            self.state
                .topology()
                .channels
                .insert(id, Arc::clone(&open));
            self.state.connections_opened.fetch_add(1, Ordering::SeqCst);

            Ok(InMemoryChannel {
                id,
                open,
                state: Arc::clone(&self.state),
            })
        })
    }

    fn target(&self) -> String {
        "memory://in-process".to_string()
    }
}

/// Channel on an [`InMemoryBroker`].
pub struct InMemoryChannel {
    id: u64,
    open: Arc<AtomicBool>,
    state: Arc<BrokerState>,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed(format!("channel {} is closed", self.id)))
        }
    }
}

impl std::fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("id", &self.id)
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl BrokerChannel for InMemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn declare_queue<'a>(&'a self, spec: &'a QueueSpec) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.state.declarations.fetch_add(1, Ordering::SeqCst);

            let mut topology = self.state.topology();
            let queue = topology.queues.entry(spec.name.clone()).or_default();
            if queue.spec.as_ref().is_some_and(|existing| existing != spec) {
                return Err(BrokerError::DeclareFailed {
                    queue: spec.name.clone(),
                    reason: "PRECONDITION_FAILED - inequivalent arguments".to_string(),
                });
            }
            queue.spec = Some(spec.clone());

            if let Some(dlq) = &spec.dead_letter {
                let dead = topology.queues.entry(dlq.clone()).or_default();
                if dead.spec.is_none() {
                    dead.spec = Some(QueueSpec::durable(dlq.clone()));
                }
            }
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
        properties: &'a PublishProperties,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            if self.state.reject_publishes.load(Ordering::SeqCst) {
                return Err(BrokerError::Rejected(queue.to_string()));
            }

            let mut topology = self.state.topology();
            let Some(state) = topology.queues.get_mut(queue).filter(|q| q.spec.is_some()) else {
                return Err(BrokerError::Rejected(queue.to_string()));
            };
            state.ready.push_back(StoredMessage {
                body: payload.to_vec(),
                redelivered: false,
                properties: properties.clone(),
            });
            self.state.published.fetch_add(1, Ordering::SeqCst);
            self.state.dispatch(&mut topology, queue);
            Ok(())
        })
    }

    fn consume<'a>(
        &'a self,
        queue: &'a str,
        consumer_tag: &'a str,
        _prefetch: u16,
    ) -> BoxFuture<'a, Result<DeliveryStream, BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let (tx, mut rx) = mpsc::unbounded_channel();

            {
                let mut topology = self.state.topology();
                let state = topology.queues.entry(queue.to_string()).or_default();
                if state.consumer.is_some() {
                    return Err(BrokerError::ConsumeFailed {
                        queue: queue.to_string(),
                        reason: "queue already has an exclusive consumer".to_string(),
                    });
                }
                state.consumer = Some(ConsumerSlot {
                    channel_id: self.id,
                    tag: consumer_tag.to_string(),
                    tx,
                });
                self.state.dispatch(&mut topology, queue);
            }

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut topology = self.state.topology();
            for state in topology.queues.values_mut() {
                if state
                    .consumer
                    .as_ref()
                    .is_some_and(|c| c.channel_id == self.id && c.tag == consumer_tag)
                {
                    state.consumer = None;
                }
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.state.close_channel(self.id);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn props() -> PublishProperties {
        PublishProperties::persistent_json("m")
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_is_rejected() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();

        let err = channel.publish("orders", b"x", &props()).await.unwrap_err();
        assert_eq!(err, BrokerError::Rejected("orders".to_string()));
    }

    #[tokio::test]
    async fn test_consume_ack_flow() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_queue(&QueueSpec::durable("orders")).await.unwrap();
        channel.publish("orders", b"one", &props()).await.unwrap();

        let mut stream = channel.consume("orders", "t", 1).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"one");
        assert_eq!(broker.unacked(), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.unacked(), 0);
        assert_eq!(broker.queue_depth("orders"), 0);
    }

    #[tokio::test]
    async fn test_reject_without_requeue_dead_letters() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let spec = QueueSpec::durable("orders").with_dead_letter("orders.dlq");
        channel.declare_queue(&spec).await.unwrap();
        channel.publish("orders", b"bad", &props()).await.unwrap();

        let mut stream = channel.consume("orders", "t", 1).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        delivery.reject(false).await.unwrap();

        assert_eq!(broker.queued_bodies("orders.dlq"), vec![b"bad".to_vec()]);
        assert_eq!(broker.queue_depth("orders"), 0);
    }

    #[tokio::test]
    async fn test_closing_channel_requeues_unacked_as_redelivered() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_queue(&QueueSpec::durable("orders")).await.unwrap();
        channel.publish("orders", b"one", &props()).await.unwrap();

        let mut stream = channel.consume("orders", "t", 1).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.redelivered);

        broker.drop_all_channels();
        assert!(stream.next().await.is_none());
        assert!(first.ack().await.is_err());
        assert_eq!(broker.queue_depth("orders"), 1);

        let channel = broker.connect().await.unwrap();
        let mut stream = channel.consume("orders", "t", 1).await.unwrap();
        let again = stream.next().await.unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(again.body, b"one");
    }

    #[tokio::test]
    async fn test_injected_connect_failures() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(1);

        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connections_opened(), 1);
    }
}
