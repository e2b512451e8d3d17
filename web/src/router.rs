//! Route table and layers.

use crate::handlers;
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// | Method | Path              | Handler                          |
/// |--------|-------------------|----------------------------------|
/// | GET    | `/kitchen/orders` | [`handlers::list_orders`]        |
/// | POST   | `/waiter/orders`  | [`handlers::create_order`]       |
/// | GET    | `/health`         | [`handlers::health_check`]       |
/// | GET    | `/health/ready`   | [`handlers::readiness`]          |
/// | GET    | `/metrics`        | [`handlers::render_metrics`]     |
///
/// CORS is permissive: the kitchen display and waiter terminal are served from other
/// origins.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/kitchen/orders", get(handlers::list_orders))
        .route("/waiter/orders", post(handlers::create_order))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::render_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(correlation_id_layer())
        .with_state(state)
}
