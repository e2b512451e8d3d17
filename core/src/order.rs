//! Order domain model.
//!
//! An [`Order`] is what the waiter terminal captures and what the kitchen display shows.
//! Orders are only constructed through [`Order::new`] (or [`NewOrder::place`]), so every
//! value of the type upholds the data-model invariants:
//!
//! - the id is non-empty and never changes after construction
//! - there is at least one item
//! - every item has a product name, a positive quantity and a finite, non-negative price

use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Reasons an order (or a draft of one) is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The order id is empty.
    #[error("Order id must not be empty")]
    EmptyId,

    /// The order has no items.
    #[error("Order must contain at least one item")]
    NoItems,

    /// An item has an empty product name.
    #[error("Item {index}: product name must not be empty")]
    EmptyProductName {
        /// Position of the offending item
        index: usize,
    },

    /// An item has a zero quantity.
    #[error("Item {index}: quantity must be greater than zero")]
    ZeroQuantity {
        /// Position of the offending item
        index: usize,
    },

    /// An item has a negative or non-finite unit price.
    #[error("Item {index}: unit price {price} must be a finite, non-negative number")]
    InvalidPrice {
        /// Position of the offending item
        index: usize,
        /// The rejected price
        price: f64,
    },
}

/// Unique identifier for an order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Creates an `OrderId` from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random (UUID v4) id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single line of an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Product name as shown on the menu
    pub product_name: String,
    /// Number of units ordered
    pub quantity: u32,
    /// Price per unit
    pub unit_price: f64,
}

impl OrderItem {
    /// Creates a new order item. Invariants are checked when the item joins an order.
    #[must_use]
    pub fn new(product_name: impl Into<String>, quantity: u32, unit_price: f64) -> Self {
        Self {
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Price of this line (`quantity * unit_price`).
    #[must_use]
    pub fn subtotal(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }

    fn validate(&self, index: usize) -> Result<(), ValidationError> {
        if self.product_name.trim().is_empty() {
            return Err(ValidationError::EmptyProductName { index });
        }
        if self.quantity == 0 {
            return Err(ValidationError::ZeroQuantity { index });
        }
        if !self.unit_price.is_finite() || self.unit_price < 0.0 {
            return Err(ValidationError::InvalidPrice {
                index,
                price: self.unit_price,
            });
        }
        Ok(())
    }
}

/// A validated restaurant order.
///
/// Serializes with camelCase field names (`customerName`, `createdAt`, ...), which is the
/// shape the kitchen display consumes.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,
    customer_name: String,
    table: String,
    items: Vec<OrderItem>,
    created_at: DateTime<Utc>,
}

impl Order {
    /// Creates an order, enforcing the data-model invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the id is empty, there are no items, or any
    /// item is invalid.
    pub fn new(
        id: OrderId,
        customer_name: impl Into<String>,
        table: impl Into<String>,
        items: Vec<OrderItem>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        for (index, item) in items.iter().enumerate() {
            item.validate(index)?;
        }

        Ok(Self {
            id,
            customer_name: customer_name.into(),
            table: table.into(),
            items,
            created_at,
        })
    }

    /// The order id.
    #[must_use]
    pub const fn id(&self) -> &OrderId {
        &self.id
    }

    /// Name of the customer who placed the order.
    #[must_use]
    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    /// Table the order is served to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ordered items (never empty).
    #[must_use]
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// When the order was placed.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sum of all item subtotals.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.items.iter().map(OrderItem::subtotal).sum()
    }
}

/// An order as submitted by the waiter terminal, before it has an id or a timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    /// Name of the customer
    pub customer_name: String,
    /// Table identifier
    pub table: String,
    /// Items to prepare
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    /// Turns the draft into an [`Order`] with the given id and creation time.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the draft violates the order invariants.
    pub fn place(self, id: OrderId, created_at: DateTime<Utc>) -> Result<Order, ValidationError> {
        Order::new(id, self.customer_name, self.table, self.items, created_at)
    }
}
