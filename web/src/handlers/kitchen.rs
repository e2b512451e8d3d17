//! Kitchen display endpoint.

use crate::WebResult;
use crate::state::AppState;
use axum::{Json, extract::State};
use order_relay_core::Order;

/// List every order the kitchen has received, oldest first.
///
/// # Endpoint
///
/// ```text
/// GET /kitchen/orders
/// ```
///
/// # Errors
///
/// Returns 500 if the store cannot be read.
pub async fn list_orders(State(state): State<AppState>) -> WebResult<Json<Vec<Order>>> {
    let orders = state.store.list_all().await?;
    tracing::debug!(count = orders.len(), "Kitchen orders listed");
    Ok(Json(orders))
}
