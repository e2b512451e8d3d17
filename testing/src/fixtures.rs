//! Sample orders.
//!
//! All helpers panic on invalid input; they are meant for tests only.

#![allow(clippy::expect_used)]

use chrono::{DateTime, Utc};
use order_relay_core::{NewOrder, Order, OrderId, OrderItem};

/// Parse an RFC 3339 timestamp.
///
/// # Panics
///
/// Panics if `ts` is not valid RFC 3339.
#[must_use]
pub fn at(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .expect("fixture timestamp should be RFC 3339")
        .with_timezone(&Utc)
}

/// Order `o1`: Ana at T3, two hamburgers, placed 2024-01-01T10:00:00Z.
#[must_use]
pub fn sample_order() -> Order {
    order_at("o1", "2024-01-01T10:00:00Z")
}

/// Single-item order with the given id and creation time.
///
/// # Panics
///
/// Panics if `id` is blank or `created_at` is not RFC 3339.
#[must_use]
pub fn order_at(id: &str, created_at: &str) -> Order {
    Order::new(
        OrderId::new(id),
        "Ana",
        "T3",
        vec![OrderItem::new("Hamburguesa", 2, 5.5)],
        at(created_at),
    )
    .expect("fixture order should be valid")
}

/// Order with the given id and items, placed at the sample time.
///
/// # Panics
///
/// Panics if the resulting order is invalid.
#[must_use]
pub fn order_with_items(id: &str, items: Vec<OrderItem>) -> Order {
    Order::new(OrderId::new(id), "Ana", "T3", items, at("2024-01-01T10:00:00Z"))
        .expect("fixture order should be valid")
}

/// Draft as submitted by the waiter terminal.
#[must_use]
pub fn new_order() -> NewOrder {
    NewOrder {
        customer_name: "Ana".to_string(),
        table: "T3".to_string(),
        items: vec![OrderItem::new("Hamburguesa", 2, 5.5)],
    }
}
