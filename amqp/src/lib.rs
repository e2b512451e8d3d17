//! RabbitMQ connector for the order relay.
//!
//! This crate implements the [`Connector`](order_relay_core::Connector) and
//! [`BrokerChannel`](order_relay_core::BrokerChannel) traits from `order-relay-core` on top
//! of `lapin`, so the runtime's producer and worker can talk to any AMQP 0-9-1 broker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   publish (confirm)   ┌──────────────┐   deliver (prefetch)   ┌──────────┐
//! │ Producer │ ────────────────────► │    orders    │ ─────────────────────► │  Worker  │
//! └──────────┘                       └──────┬───────┘                        └────┬─────┘
//!                                           │ nack(requeue=false)                 │ upsert
//!                                           ▼                                     ▼
//!                                    ┌──────────────┐                      ┌────────────┐
//!                                    │ dead letters │                      │  kitchen   │
//!                                    └──────────────┘                      └────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual acknowledgements:
//! - Messages are published persistent and the publish only succeeds once the broker confirms
//! - The worker acks AFTER the order is stored; a lost channel redelivers anything unacked
//! - Messages that cannot be decoded are rejected without requeue and dead-lettered through
//!   the default exchange
//!
//! # Profiles
//!
//! [`AmqpSettings`] carries the two deployment profiles: `cloud` (TLS, port 5671) and
//! `local` (plain AMQP on 5672, locale `en_US`, server-chosen frame size, no heartbeat).
//!
//! # Example
//!
//! ```no_run
//! use order_relay_amqp::{AmqpConnector, AmqpSettings};
//! use order_relay_runtime::ConnectionManager;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = AmqpConnector::new(AmqpSettings::local());
//! let manager = Arc::new(ConnectionManager::new(connector));
//! let lease = manager.acquire_channel().await?;
//! # drop(lease);
//! # Ok(())
//! # }
//! ```

/// Connector, channel and acknowledger backed by lapin
pub mod channel;

/// Broker profiles and connection settings
pub mod settings;

pub use channel::{AmqpChannel, AmqpConnector};
pub use settings::{AmqpProfile, AmqpSettings, SettingsError};
