//! Wire format for orders travelling through the broker.
//!
//! Messages are JSON envelopes carrying a schema version next to the order itself:
//!
//! ```json
//! {
//!   "version": 1,
//!   "order": {
//!     "id": "o1",
//!     "customerName": "Ana",
//!     "table": "T3",
//!     "items": [{ "productName": "Hamburguesa", "quantity": 2, "unitPrice": 5.5 }],
//!     "createdAt": "2024-01-01T10:00:00Z"
//!   }
//! }
//! ```
//!
//! Decoding is tolerant where it can be and strict where it must be:
//!
//! - unknown fields (in the envelope or the order) are ignored
//! - a bare order object without an envelope is read as version 1, unless it carries
//!   a root-level `version` naming another schema
//! - `customerName` and `table` default to empty strings
//! - `id`, a non-empty `items` array and `createdAt` are required
//! - the decoded order must satisfy every [`Order`] invariant
//!
//! The round-trip law `decode(&encode(&o)) == Ok(o)` holds for every valid order.

use crate::order::{Order, OrderId, OrderItem, ValidationError};
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Schema version written by [`encode`].
pub const SCHEMA_VERSION: u32 = 1;

/// MIME type of encoded messages.
pub const CONTENT_TYPE: &str = "application/json";

/// Errors produced while decoding a message body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The body is not JSON or does not have the expected shape.
    #[error("Malformed message body: {0}")]
    Malformed(String),

    /// The envelope declares a schema version this build does not understand.
    #[error("Unsupported schema version {0}")]
    UnsupportedVersion(u64),

    /// A required field is absent.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// The fields are present but violate an order invariant.
    #[error("Invalid order: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    order: &'a Order,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrder {
    id: Option<String>,
    #[serde(default)]
    customer_name: String,
    #[serde(default)]
    table: String,
    items: Option<Vec<OrderItem>>,
    created_at: Option<DateTime<Utc>>,
}

/// Encodes an order into a versioned JSON envelope.
#[must_use]
pub fn encode(order: &Order) -> Vec<u8> {
    let envelope = EnvelopeRef {
        version: SCHEMA_VERSION,
        order,
    };
    // Serializing plain structs with string keys and finite floats cannot fail.
    serde_json::to_vec(&envelope).unwrap_or_default()
}

/// Decodes a message body into an [`Order`].
///
/// # Errors
///
/// Returns a [`DecodeError`] if the body is not valid JSON, carries an unsupported
/// version, lacks a required field, or describes an order that violates an invariant.
pub fn decode(bytes: &[u8]) -> Result<Order, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let Value::Object(mut root) = value else {
        return Err(DecodeError::Malformed("expected a JSON object".to_string()));
    };

    // A root-level version applies to bare orders as well as envelopes
    let version = match root.get("version") {
        None => u64::from(SCHEMA_VERSION),
        Some(v) => v.as_u64().ok_or_else(|| {
            DecodeError::Malformed("'version' must be an unsigned integer".to_string())
        })?,
    };
    if version != u64::from(SCHEMA_VERSION) {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let order_value = match root.remove("order") {
        Some(order @ Value::Object(_)) => order,
        Some(_) => {
            return Err(DecodeError::Malformed("'order' must be an object".to_string()));
        },
        // Bare order, as written by producers that predate the envelope
        None => Value::Object(root),
    };

    let wire: WireOrder =
        serde_json::from_value(order_value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let id = wire
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or(DecodeError::MissingField("id"))?;
    let items = wire
        .items
        .filter(|items| !items.is_empty())
        .ok_or(DecodeError::MissingField("items"))?;
    let created_at = wire.created_at.ok_or(DecodeError::MissingField("createdAt"))?;

    Ok(Order::new(
        OrderId::new(id),
        wire.customer_name,
        wire.table,
        items,
        created_at,
    )?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Order {
        Order::new(
            OrderId::new("o1"),
            "Ana",
            "T3",
            vec![OrderItem::new("Hamburguesa", 2, 5.5)],
            DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
        .unwrap()
    }

    #[test]
    fn test_encode_writes_versioned_envelope() {
        let bytes = encode(&sample());
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["order"]["id"], "o1");
        assert_eq!(value["order"]["items"][0]["productName"], "Hamburguesa");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let body = br#"{
            "version": 1,
            "traceId": "abc",
            "order": {
                "id": "o1",
                "customerName": "Ana",
                "table": "T3",
                "notes": "sin cebolla",
                "items": [{"productName": "Hamburguesa", "quantity": 2, "unitPrice": 5.5, "sku": 7}],
                "createdAt": "2024-01-01T10:00:00Z"
            }
        }"#;

        assert_eq!(decode(body).unwrap(), sample());
    }

    #[test]
    fn test_decode_accepts_bare_order() {
        let body = br#"{
            "id": "o1",
            "customerName": "Ana",
            "table": "T3",
            "items": [{"productName": "Hamburguesa", "quantity": 2, "unitPrice": 5.5}],
            "createdAt": "2024-01-01T10:00:00Z"
        }"#;

        assert_eq!(decode(body).unwrap(), sample());
    }

    #[test]
    fn test_decode_bare_order_honours_root_version() {
        let v1 = br#"{"version":1,"id":"o1","customerName":"Ana","table":"T3","items":[{"productName":"Hamburguesa","quantity":2,"unitPrice":5.5}],"createdAt":"2024-01-01T10:00:00Z"}"#;
        assert_eq!(decode(v1).unwrap(), sample());

        let v2 = br#"{"version":2,"id":"o1","customerName":"Ana","table":"T3","items":[{"productName":"Hamburguesa","quantity":2,"unitPrice":5.5}],"createdAt":"2024-01-01T10:00:00Z"}"#;
        assert_eq!(decode(v2).unwrap_err(), DecodeError::UnsupportedVersion(2));

        let bad = br#"{"version":"two","id":"o1","items":[{"productName":"x","quantity":1,"unitPrice":1}],"createdAt":"2024-01-01T10:00:00Z"}"#;
        assert!(matches!(decode(bad).unwrap_err(), DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_missing_required_fields() {
        let no_id = br#"{"version":1,"order":{"items":[{"productName":"x","quantity":1,"unitPrice":1}],"createdAt":"2024-01-01T10:00:00Z"}}"#;
        assert_eq!(decode(no_id).unwrap_err(), DecodeError::MissingField("id"));

        let empty_items = br#"{"version":1,"order":{"id":"o1","items":[],"createdAt":"2024-01-01T10:00:00Z"}}"#;
        assert_eq!(decode(empty_items).unwrap_err(), DecodeError::MissingField("items"));

        let no_items = br#"{"version":1,"order":{"id":"o1","createdAt":"2024-01-01T10:00:00Z"}}"#;
        assert_eq!(decode(no_items).unwrap_err(), DecodeError::MissingField("items"));

        let no_ts = br#"{"version":1,"order":{"id":"o1","items":[{"productName":"x","quantity":1,"unitPrice":1}]}}"#;
        assert_eq!(decode(no_ts).unwrap_err(), DecodeError::MissingField("createdAt"));
    }

    #[test]
    fn test_decode_rejects_garbage_and_bad_versions() {
        assert!(matches!(decode(b"not json").unwrap_err(), DecodeError::Malformed(_)));
        assert!(matches!(decode(b"[1,2,3]").unwrap_err(), DecodeError::Malformed(_)));

        let v2 = br#"{"version":2,"order":{"id":"o1"}}"#;
        assert_eq!(decode(v2).unwrap_err(), DecodeError::UnsupportedVersion(2));
    }

    #[test]
    fn test_decode_enforces_item_invariants() {
        let zero_qty = br#"{"version":1,"order":{"id":"o1","items":[{"productName":"x","quantity":0,"unitPrice":1}],"createdAt":"2024-01-01T10:00:00Z"}}"#;
        assert_eq!(
            decode(zero_qty).unwrap_err(),
            DecodeError::Invalid(ValidationError::ZeroQuantity { index: 0 })
        );

        let negative_qty = br#"{"version":1,"order":{"id":"o1","items":[{"productName":"x","quantity":-1,"unitPrice":1}],"createdAt":"2024-01-01T10:00:00Z"}}"#;
        assert!(matches!(decode(negative_qty).unwrap_err(), DecodeError::Malformed(_)));
    }

    fn arb_item() -> impl Strategy<Value = OrderItem> {
        ("[A-Za-z][A-Za-z ]{0,20}", 1u32..50, 0u32..100_000)
            .prop_map(|(name, qty, cents)| OrderItem::new(name, qty, f64::from(cents) / 100.0))
    }

    fn arb_order() -> impl Strategy<Value = Order> {
        (
            "[a-z0-9-]{1,36}",
            ".{0,20}",
            "T[0-9]{1,2}",
            proptest::collection::vec(arb_item(), 1..6),
            0i64..4_000_000_000,
            0u32..1_000_000_000,
        )
            .prop_map(|(id, customer, table, items, secs, nanos)| {
                let created_at = DateTime::from_timestamp(secs, nanos).unwrap();
                Order::new(OrderId::new(id), customer, table, items, created_at).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(order in arb_order()) {
            prop_assert_eq!(decode(&encode(&order)), Ok(order));
        }
    }
}
