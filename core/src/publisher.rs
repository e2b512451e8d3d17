//! Publishing orders to the broker.

use crate::broker::{BoxFuture, BrokerError, ConnectionError};
use crate::environment::Clock;
use crate::order::{NewOrder, Order, OrderId, ValidationError};
use thiserror::Error;

/// Errors surfaced to the waiter boundary when an order could not be handed to the broker.
///
/// Every variant is retryable by the caller; none of them means the order was accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// No channel could be acquired.
    #[error("Publish failed, no broker channel: {0}")]
    Connection(#[from] ConnectionError),

    /// The target queue could not be declared.
    #[error("Publish failed, queue '{queue}' could not be declared: {reason}")]
    Declare {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// The broker refused the message.
    #[error("Broker rejected order {order_id} on queue '{queue}'")]
    Rejected {
        /// The order that was refused
        order_id: OrderId,
        /// The target queue
        queue: String,
    },

    /// The channel failed while sending.
    #[error("Publish of order {order_id} to '{queue}' failed: {reason}")]
    Transport {
        /// The order being sent
        order_id: OrderId,
        /// The target queue
        queue: String,
        /// The reason for failure
        reason: String,
    },
}

impl PublishError {
    /// Maps a channel-level failure during the send of `order_id`.
    #[must_use]
    pub fn from_broker(order_id: &OrderId, queue: &str, error: BrokerError) -> Self {
        match error {
            BrokerError::Rejected(_) => Self::Rejected {
                order_id: order_id.clone(),
                queue: queue.to_string(),
            },
            BrokerError::DeclareFailed { queue, reason } => Self::Declare { queue, reason },
            other => Self::Transport {
                order_id: order_id.clone(),
                queue: queue.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Anything that can hand an order to the broker.
///
/// Implemented by the runtime `Producer`; test doubles live in `order-relay-testing`.
pub trait OrderPublisher: Send + Sync {
    /// Publish the order durably.
    ///
    /// Resolves with `Ok(())` only once the broker has accepted the message.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the channel is unavailable or the broker refuses the
    /// message.
    fn publish<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), PublishError>>;
}

/// Why a draft order from the waiter terminal did not reach the broker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaceOrderError {
    /// The draft violates the order invariants; retrying will not help.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The order was valid but could not be published; the waiter may retry.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Validate `draft`, assign a fresh id and `createdAt`, and publish it.
///
/// Returns the order exactly as published.
///
/// # Errors
///
/// Returns [`PlaceOrderError::Invalid`] before anything is sent if the draft is invalid,
/// or [`PlaceOrderError::Publish`] if the broker did not accept it.
pub async fn place_order(
    publisher: &dyn OrderPublisher,
    clock: &dyn Clock,
    draft: NewOrder,
) -> Result<Order, PlaceOrderError> {
    let order = draft.place(OrderId::generate(), clock.now())?;
    publisher.publish(&order).await?;
    Ok(order)
}
