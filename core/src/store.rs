//! Read model of orders as the kitchen sees them.
//!
//! The worker writes into an [`OrderStore`]; the kitchen-facing HTTP handler reads from it.
//! This is the query side of the pipeline: it lags the broker slightly and is rebuilt by
//! redelivery, never by the producer.

use crate::broker::BoxFuture;
use crate::order::Order;
use thiserror::Error;

/// Error type for store operations.
///
/// The in-memory store does not fail under normal operation. The type exists so that
/// persistent backends can report failures without changing the worker contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing storage cannot be read or written.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed order storage with idempotent writes.
///
/// # Idempotency
///
/// `upsert` replaces any entry with the same [`Order::id`]. Applying the same order twice
/// leaves the store exactly as applying it once, which is what makes at-least-once
/// delivery safe.
///
/// # Consistency
///
/// `list_all` returns a snapshot: no entry is observed half-written, and every order in
/// the result is the latest version written before the snapshot was taken.
pub trait OrderStore: Send + Sync {
    /// Insert or replace the order keyed by its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be written.
    fn upsert(&self, order: Order) -> BoxFuture<'_, Result<()>>;

    /// All orders, oldest `createdAt` first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be read.
    fn list_all(&self) -> BoxFuture<'_, Result<Vec<Order>>>;

    /// Number of distinct orders.
    ///
    /// The default implementation counts a full listing; backends should override it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be read.
    fn count(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move { Ok(self.list_all().await?.len()) })
    }
}
