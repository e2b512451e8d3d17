//! HTTP surface of the order relay.
//!
//! # Architecture
//!
//! ```text
//! waiter terminal ──POST /waiter/orders──► place_order ──► OrderPublisher ──► broker
//!                                                                              │
//!                                                                           Worker
//!                                                                              │
//! kitchen display ◄──GET /kitchen/orders── OrderStore ◄────── upsert ──────────┘
//! ```
//!
//! Handlers only see trait objects ([`OrderStore`](order_relay_core::OrderStore),
//! [`OrderPublisher`](order_relay_core::OrderPublisher)) through [`AppState`], so the
//! whole router runs in tests without a broker.
//!
//! # Example
//!
//! ```
//! use order_relay_projections::KitchenOrderStore;
//! use order_relay_runtime::WorkerState;
//! use order_relay_testing::RecordingPublisher;
//! use order_relay_web::{AppState, router};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! let (_worker, worker_state) = watch::channel(WorkerState::Subscribed);
//! let state = AppState::new(
//!     Arc::new(KitchenOrderStore::new()),
//!     Arc::new(RecordingPublisher::new()),
//!     worker_state,
//! );
//! let app: axum::Router = router(state);
//! # drop(app);
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
