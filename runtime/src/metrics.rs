//! Prometheus metrics for the order pipeline.
//!
//! Recording is always on: the `metrics` macros are no-ops until a recorder is installed.
//! The service calls [`install_recorder`] once at startup and hands the returned
//! [`PrometheusHandle`] to the web layer, which renders it on `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use order_relay_runtime::metrics;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = metrics::install_recorder()?;
//! metrics::PipelineMetrics::record_published();
//! assert!(handle.render().contains("orders_published_total"));
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the global recorder
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder globally and describe all pipeline metrics.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_metrics();
    tracing::info!("Prometheus recorder installed");
    Ok(handle)
}

/// Register all metric descriptions.
fn register_metrics() {
    // Producer
    describe_counter!(
        "orders_published_total",
        "Orders accepted by the broker"
    );
    describe_counter!(
        "orders_publish_failures_total",
        "Orders that could not be handed to the broker"
    );

    // Worker
    describe_counter!(
        "orders_consumed_total",
        "Orders upserted into the kitchen store and acknowledged"
    );
    describe_counter!(
        "orders_decode_failures_total",
        "Messages rejected because they could not be decoded"
    );
    describe_counter!(
        "orders_store_failures_total",
        "Messages requeued because the store write failed or timed out"
    );
    describe_counter!(
        "worker_reconnects_total",
        "Times the worker lost its subscription and resubscribed"
    );
    describe_gauge!("kitchen_orders", "Distinct orders in the kitchen store");

    // Connection manager
    describe_counter!(
        "broker_connections_opened_total",
        "Connection and channel pairs opened by the connection manager"
    );
}

/// Pipeline metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record an accepted publish.
    pub fn record_published() {
        counter!("orders_published_total").increment(1);
    }

    /// Record a failed publish.
    pub fn record_publish_failure() {
        counter!("orders_publish_failures_total").increment(1);
    }

    /// Record a consumed and acknowledged order.
    pub fn record_consumed() {
        counter!("orders_consumed_total").increment(1);
    }

    /// Record an undecodable message.
    pub fn record_decode_failure() {
        counter!("orders_decode_failures_total").increment(1);
    }

    /// Record a store write that failed or timed out.
    pub fn record_store_failure() {
        counter!("orders_store_failures_total").increment(1);
    }

    /// Record a worker resubscription.
    pub fn record_reconnect() {
        counter!("worker_reconnects_total").increment(1);
    }

    /// Record a newly opened broker connection.
    pub fn record_connection_opened() {
        counter!("broker_connections_opened_total").increment(1);
    }

    /// Record the current size of the kitchen store.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_kitchen_orders(count: usize) {
        gauge!("kitchen_orders").set(count as f64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_pipeline_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            PipelineMetrics::record_published();
            PipelineMetrics::record_decode_failure();
            PipelineMetrics::record_kitchen_orders(3);
        });

        let rendered = handle.render();
        assert!(rendered.contains("orders_published_total 1"));
        assert!(rendered.contains("orders_decode_failures_total 1"));
        assert!(rendered.contains("kitchen_orders 3"));
    }

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        PipelineMetrics::record_consumed();
        PipelineMetrics::record_reconnect();
    }
}
