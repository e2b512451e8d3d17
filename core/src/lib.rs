//! # Order Relay Core
//!
//! Domain types and seams for routing restaurant orders from the waiter terminal to the
//! kitchen display through a message broker.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐    ┌──────────┐    ┌─────────────┐    ┌──────────┐    ┌─────────────┐
//! │    Waiter    │───▶│ Producer │───▶│ Broker queue│───▶│  Worker  │───▶│ Order store │
//! │  (HTTP POST) │    │ (encode) │    │  (durable)  │    │ (decode) │    │ (kitchen)   │
//! └──────────────┘    └──────────┘    └─────────────┘    └──────────┘    └─────────────┘
//! ```
//!
//! This crate holds what every stage agrees on:
//!
//! - [`order`]: the validated [`Order`] model
//! - [`codec`]: the versioned wire format
//! - [`broker`]: the [`Connector`] / [`BrokerChannel`] traits and their errors
//! - [`publisher`]: the [`OrderPublisher`] seam used by the waiter boundary
//! - [`store`]: the [`OrderStore`] seam used by the worker and the kitchen boundary
//! - [`environment`]: injected dependencies such as the [`Clock`](environment::Clock)
//!
//! Nothing here performs I/O or reads configuration; concrete brokers and stores live in
//! the sibling crates.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod broker;
pub mod codec;
pub mod order;
pub mod publisher;
pub mod store;

pub use broker::{
    Acknowledger, BoxFuture, BrokerChannel, BrokerError, ConnectionError, Connector, Delivery,
    DeliveryStream, PublishProperties, QueueSpec,
};
pub use codec::DecodeError;
pub use order::{NewOrder, Order, OrderId, OrderItem, ValidationError};
pub use publisher::{OrderPublisher, PlaceOrderError, PublishError, place_order};
pub use store::{OrderStore, StoreError};

/// Environment module - injected dependencies
///
/// All external dependencies of the pipeline that are not the broker itself are
/// abstracted behind traits here, so tests can pin them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use order_relay_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
