//! Order relay service.
//!
//! Wires the RabbitMQ connector, the producer, the kitchen worker and the HTTP surface
//! into one process. The binary lives in `main.rs`; this library only exposes the
//! configuration so it can be tested without a broker.

pub mod config;

pub use config::{Config, ConfigError, ServerConfig};

/// Log filter used when `RUST_LOG` is not set: every workspace crate at `info`, request
/// traces at `debug`.
pub const DEFAULT_LOG_FILTER: &str = "order_relay=info,order_relay_service=info,\
order_relay_runtime=info,order_relay_amqp=info,order_relay_web=info,\
order_relay_projections=info,order_relay_core=info,tower_http=debug";
