//! Prometheus scrape endpoint.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;

/// Render the Prometheus text exposition.
///
/// # Endpoint
///
/// ```text
/// GET /metrics
/// ```
///
/// # Errors
///
/// Returns 404 when no recorder was installed.
#[allow(clippy::unused_async)]
pub async fn render_metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state
        .metrics
        .as_ref()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or_else(|| AppError::not_found("Metrics recorder is not installed"))
}
