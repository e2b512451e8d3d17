//! Waiter terminal endpoint.

use crate::WebResult;
use crate::state::AppState;
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use order_relay_core::{NewOrder, Order, place_order};

/// Accept a draft order, stamp it with an id and `createdAt`, and publish it.
///
/// # Endpoint
///
/// ```text
/// POST /waiter/orders
/// { "customerName": "Ana", "table": "T3", "items": [...] }
/// ```
///
/// Responds `201 Created` with the order as published.
///
/// # Errors
///
/// - 422 if the body is not a valid draft order
/// - 503 if the broker did not accept the order; the waiter may retry
pub async fn create_order(
    State(state): State<AppState>,
    body: Result<Json<NewOrder>, JsonRejection>,
) -> WebResult<(StatusCode, Json<Order>)> {
    let Json(draft) = body?;
    let order = place_order(state.publisher.as_ref(), state.clock.as_ref(), draft).await?;

    tracing::info!(
        order_id = %order.id(),
        table = %order.table(),
        items = order.items().len(),
        "Order sent to kitchen"
    );
    Ok((StatusCode::CREATED, Json(order)))
}
