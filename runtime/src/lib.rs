//! # Order Relay Runtime
//!
//! The moving parts of the order pipeline.
//!
//! ## Core Components
//!
//! - **[`ConnectionManager`]**: lazily opens and memoizes the shared broker channel, with
//!   single-flight creation and generation tracking
//! - **[`Producer`]**: publishes orders durably and confirms them with the broker
//! - **[`Worker`]**: consumes the order queue into an
//!   [`OrderStore`](order_relay_core::OrderStore), reconnecting with backoff until shut down
//! - **[`retry`]**: exponential backoff with jitter
//! - **[`metrics`]**: Prometheus counters for the pipeline
//!
//! All components are generic over a [`Connector`](order_relay_core::Connector), so the
//! same code runs against RabbitMQ (`order-relay-amqp`) and the in-memory broker from
//! `order-relay-testing`.
//!
//! ## Example
//!
//! ```
//! use order_relay_runtime::{ConnectionManager, Producer, Worker, WorkerConfig};
//! use order_relay_projections::KitchenOrderStore;
//! use order_relay_core::{OrderPublisher, QueueSpec};
//! use order_relay_testing::{InMemoryBroker, fixtures};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = QueueSpec::durable("orders");
//! let manager = Arc::new(ConnectionManager::new(InMemoryBroker::new()));
//! let store = Arc::new(KitchenOrderStore::new());
//!
//! let producer = Producer::new(Arc::clone(&manager), queue.clone());
//! let worker = Worker::new(Arc::clone(&manager), store.clone(), WorkerConfig::new(queue)).spawn();
//!
//! producer.publish(&fixtures::sample_order()).await?;
//!
//! worker.stop(Duration::from_secs(5)).await;
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

/// Shared broker connection lifecycle
pub mod connection;

/// Prometheus metrics for observability
pub mod metrics;

/// Durable order publishing
pub mod producer;

/// Exponential backoff for reconnect loops
pub mod retry;

/// Queue consumer feeding the kitchen store
pub mod worker;

pub use connection::{ChannelLease, ConnectionManager};
pub use producer::Producer;
pub use retry::RetryPolicy;
pub use worker::{Worker, WorkerConfig, WorkerHandle, WorkerState};
