//! Read models for the order relay.
//!
//! # Overview
//!
//! The kitchen never talks to the broker directly. The worker materializes every consumed
//! order into a [`KitchenOrderStore`], and the kitchen display polls that store over HTTP:
//!
//! ```text
//! Broker queue  →  Worker  →  KitchenOrderStore  →  GET /kitchen/orders
//! ```
//!
//! The store is in-memory only; a restart rebuilds it from whatever the broker still holds.

pub mod kitchen;

pub use kitchen::{KitchenEntry, KitchenOrderStore, Upserted};
