//! Health check endpoints.
//!
//! Used by load balancers and orchestrators. Liveness never touches the broker; readiness
//! reflects whether the worker is currently attached to the order queue.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Simple health check endpoint (for basic liveness).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `ready` or `not_ready`
    pub status: &'static str,
    /// Worker lifecycle state, e.g. `subscribed` or `reconnecting`
    pub worker: &'static str,
}

/// Readiness check based on the worker state.
///
/// # Status Codes
///
/// - 200 OK: worker is subscribed or processing
/// - 503 Service Unavailable: worker is starting, reconnecting or stopped
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ready", "worker": "subscribed" }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let worker = *state.worker.borrow();

    let (status, label) = if worker.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status,
        Json(Readiness {
            status: label,
            worker: worker.as_str(),
        }),
    )
}
