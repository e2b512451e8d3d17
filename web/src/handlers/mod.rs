//! HTTP request handlers.

pub mod health;
pub mod kitchen;
pub mod metrics;
pub mod waiter;

pub use health::{health_check, readiness};
pub use kitchen::list_orders;
pub use metrics::render_metrics;
pub use waiter::create_order;
