//! In-memory kitchen order list.
//!
//! Lives for the lifetime of the process; there is no eviction and nothing is persisted.

use order_relay_core::environment::{Clock, SystemClock};
use order_relay_core::store::{OrderStore, Result, StoreError};
use order_relay_core::{BoxFuture, DateTime, Order, OrderId, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A stored order plus the time the kitchen last received it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitchenEntry {
    /// The last-seen version of the order
    pub order: Order,
    /// When that version was written to the store
    pub received_at: DateTime<Utc>,
}

/// Whether an upsert created a new entry or replaced an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    /// First time this id was seen
    Inserted,
    /// An entry with this id was overwritten
    Replaced,
}

/// Process-lifetime map from order id to the last-seen order.
///
/// Cloning is cheap and every clone shares the same map, so the worker and the HTTP
/// handlers can each hold one.
///
/// # Concurrency
///
/// A single `RwLock` guards the map. Writes replace one key atomically; reads copy the
/// entries out under the read lock, so a listing is a consistent snapshot.
///
/// # Example
///
/// ```
/// use order_relay_projections::KitchenOrderStore;
/// use order_relay_core::{Order, OrderId, OrderItem, Utc};
///
/// let store = KitchenOrderStore::new();
/// let order = Order::new(
///     OrderId::new("o1"),
///     "Ana",
///     "T3",
///     vec![OrderItem::new("Hamburguesa", 2, 5.5)],
///     Utc::now(),
/// )?;
///
/// store.upsert_order(order.clone())?;
/// store.upsert_order(order)?; // redelivery: no new entry
/// assert_eq!(store.len()?, 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct KitchenOrderStore {
    entries: Arc<RwLock<HashMap<OrderId, KitchenEntry>>>,
    clock: Arc<dyn Clock>,
}

impl KitchenOrderStore {
    /// Create an empty store stamping entries with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping entries with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Insert or replace the order keyed by its id (last write wins).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock was poisoned by a panicking writer.
    pub fn upsert_order(&self, order: Order) -> Result<Upserted> {
        let entry = KitchenEntry {
            received_at: self.clock.now(),
            order,
        };
        let id = entry.order.id().clone();

        let previous = self
            .entries
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .insert(id.clone(), entry);

        let outcome = if previous.is_some() {
            Upserted::Replaced
        } else {
            Upserted::Inserted
        };
        tracing::debug!(order_id = %id, outcome = ?outcome, "Kitchen order upserted");
        Ok(outcome)
    }

    /// All orders sorted by `createdAt` ascending, ties broken by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock was poisoned.
    pub fn snapshot(&self) -> Result<Vec<Order>> {
        Ok(self.entries()?.into_iter().map(|entry| entry.order).collect())
    }

    /// All entries (with `receivedAt`) in the same order as [`snapshot`](Self::snapshot).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock was poisoned.
    pub fn entries(&self) -> Result<Vec<KitchenEntry>> {
        let mut entries: Vec<KitchenEntry> = self
            .entries
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .values()
            .cloned()
            .collect();

        entries.sort_by(|a, b| {
            a.order
                .created_at()
                .cmp(&b.order.created_at())
                .then_with(|| a.order.id().cmp(b.order.id()))
        });
        Ok(entries)
    }

    /// Look up a single order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock was poisoned.
    pub fn get(&self, id: &OrderId) -> Result<Option<KitchenEntry>> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .get(id)
            .cloned())
    }

    /// Number of distinct orders.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock was poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .len())
    }

    /// Whether no order has been received yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock was poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for KitchenOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KitchenOrderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KitchenOrderStore")
            .field("len", &self.len().ok())
            .finish_non_exhaustive()
    }
}

impl OrderStore for KitchenOrderStore {
    fn upsert(&self, order: Order) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.upsert_order(order).map(|_| ()) })
    }

    fn list_all(&self) -> BoxFuture<'_, Result<Vec<Order>>> {
        Box::pin(async move { self.snapshot() })
    }

    fn count(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move { self.len() })
    }
}
