//! Broker abstraction used by the producer and the worker.
//!
//! The pipeline only needs a handful of broker operations: declare a durable queue,
//! publish a persistent message, consume with manual acknowledgements, and close. These are
//! captured by two traits:
//!
//! - [`Connector`] opens a new connection and a channel on it. The connection manager
//!   calls it at most once per generation.
//! - [`BrokerChannel`] is the open connection + channel pair. It is shared (behind an
//!   `Arc`) by every publisher and consumer in the process.
//!
//! # Delivery Semantics
//!
//! **At-least-once**: a consumer acknowledges a [`Delivery`] only after it has been
//! processed. Unacknowledged deliveries are redelivered by the broker when the channel
//! closes, so consumers must be idempotent.
//!
//! # Implementations
//!
//! - `AmqpConnector` in `order-relay-amqp` - RabbitMQ / CloudAMQP via `lapin`
//! - `InMemoryBroker` in `order-relay-testing` - for tests (fast, deterministic)
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] instead of using `async fn` so that channels and
//! acknowledgers can be used as trait objects.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed, sendable future returned by broker operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised while establishing the broker connection or its channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker could not be reached or refused the connection.
    #[error("Broker unreachable at {target}: {reason}")]
    Unreachable {
        /// Redacted description of the connection target
        target: String,
        /// The reason for failure
        reason: String,
    },

    /// The connection opened but no usable channel was produced.
    #[error("channel not established: {0}")]
    ChannelNotEstablished(String),
}

/// Errors raised by operations on an open channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The channel (or its connection) is no longer open.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Declaring a queue failed.
    #[error("Queue declaration failed for '{queue}': {reason}")]
    DeclareFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// The broker negatively acknowledged a published message.
    #[error("Broker rejected message for '{0}'")]
    Rejected(String),

    /// Starting or cancelling a consumer failed.
    #[error("Consumer error on '{queue}': {reason}")]
    ConsumeFailed {
        /// The queue being consumed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Acknowledging or rejecting a delivery failed.
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    /// Network or protocol failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    /// Whether the error means the channel must be replaced before it can be used again.
    #[must_use]
    pub const fn is_channel_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed(_) | Self::Transport(_))
    }
}

/// Declaration parameters for the order queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name (also the routing key on the default exchange)
    pub name: String,
    /// Whether the queue survives a broker restart
    pub durable: bool,
    /// Queue receiving rejected messages, if any
    pub dead_letter: Option<String>,
}

impl QueueSpec {
    /// A durable queue without dead-lettering.
    #[must_use]
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            dead_letter: None,
        }
    }

    /// Routes rejected messages to the given queue.
    #[must_use]
    pub fn with_dead_letter(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter = Some(queue.into());
        self
    }
}

/// Per-message publish properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishProperties {
    /// Broker-level message id
    pub message_id: Option<String>,
    /// MIME type of the body
    pub content_type: String,
    /// Request persistence (delivery mode 2)
    pub persistent: bool,
}

impl PublishProperties {
    /// Persistent JSON message with the given id.
    #[must_use]
    pub fn persistent_json(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            content_type: crate::codec::CONTENT_TYPE.to_string(),
            persistent: true,
        }
    }
}

/// Settles a delivery with the broker.
pub trait Acknowledger: Send + Sync {
    /// Positively acknowledge the delivery.
    fn ack(&self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Negatively acknowledge the delivery.
    ///
    /// With `requeue == false` the broker dead-letters the message (if the queue has a
    /// dead-letter target) or drops it.
    fn reject(&self, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// A message handed to a consumer.
pub struct Delivery {
    /// Raw message body
    pub body: Vec<u8>,
    /// Broker-assigned tag, unique per channel
    pub delivery_tag: u64,
    /// Whether the broker has delivered this message before
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Creates a delivery settled through `acker`.
    #[must_use]
    pub fn new(
        body: Vec<u8>,
        delivery_tag: u64,
        redelivered: bool,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self {
            body,
            delivery_tag,
            redelivered,
            acker: Box::new(acker),
        }
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] (or a channel error) if the broker cannot be told.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Reject the delivery, optionally asking the broker to requeue it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] (or a channel error) if the broker cannot be told.
    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a consumer. Ends when the consumer is cancelled or the
/// channel closes.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// An open connection + channel pair.
pub trait BrokerChannel: Send + Sync {
    /// Whether both the connection and the channel are still usable.
    fn is_open(&self) -> bool;

    /// Declare a queue. Declaring an existing queue with the same parameters is a no-op.
    fn declare_queue<'a>(&'a self, spec: &'a QueueSpec) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Publish to `queue` through the default exchange.
    ///
    /// Resolves once the broker has accepted the message for routing.
    fn publish<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
        properties: &'a PublishProperties,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Start consuming `queue` with manual acknowledgements and the given prefetch.
    fn consume<'a>(
        &'a self,
        queue: &'a str,
        consumer_tag: &'a str,
        prefetch: u16,
    ) -> BoxFuture<'a, Result<DeliveryStream, BrokerError>>;

    /// Cancel a consumer started with [`consume`](Self::consume).
    fn cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Close the channel, then the connection.
    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Opens connection + channel pairs.
pub trait Connector: Send + Sync {
    /// The channel type produced.
    type Channel: BrokerChannel + 'static;

    /// Open a new connection and a channel on it.
    fn connect(&self) -> BoxFuture<'_, Result<Self::Channel, ConnectionError>>;

    /// Human-readable target for logs. Must not include credentials.
    fn target(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_spec_builder() {
        let spec = QueueSpec::durable("orders").with_dead_letter("orders.dead-letter");
        assert!(spec.durable);
        assert_eq!(spec.dead_letter.as_deref(), Some("orders.dead-letter"));
    }

    #[test]
    fn test_channel_fatal_classification() {
        assert!(BrokerError::ChannelClosed("gone".into()).is_channel_fatal());
        assert!(BrokerError::Transport("reset".into()).is_channel_fatal());
        assert!(!BrokerError::Rejected("orders".into()).is_channel_fatal());
    }

    #[test]
    fn test_connection_error_message() {
        let err = ConnectionError::ChannelNotEstablished("create_channel returned nothing".into());
        assert_eq!(
            err.to_string(),
            "channel not established: create_channel returned nothing"
        );
    }

    #[test]
    fn test_persistent_json_properties() {
        let props = PublishProperties::persistent_json("o1");
        assert!(props.persistent);
        assert_eq!(props.content_type, "application/json");
        assert_eq!(props.message_id.as_deref(), Some("o1"));
    }
}
