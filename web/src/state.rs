//! Shared state handed to every handler.

use metrics_exporter_prometheus::PrometheusHandle;
use order_relay_core::environment::{Clock, SystemClock};
use order_relay_core::{OrderPublisher, OrderStore};
use order_relay_runtime::WorkerState;
use std::sync::Arc;
use tokio::sync::watch;

/// Application state shared across all HTTP handlers.
///
/// Everything is behind a trait object so the router can be exercised with the in-memory
/// doubles from `order-relay-testing`.
#[derive(Clone)]
pub struct AppState {
    /// Kitchen read model
    pub store: Arc<dyn OrderStore>,
    /// Where waiter orders are sent
    pub publisher: Arc<dyn OrderPublisher>,
    /// Stamps `createdAt` on new orders
    pub clock: Arc<dyn Clock>,
    /// Latest state of the queue worker
    pub worker: watch::Receiver<WorkerState>,
    /// Prometheus exposition, if a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state with the system clock and no metrics endpoint.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn OrderPublisher>,
        worker: watch::Receiver<WorkerState>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock: Arc::new(SystemClock),
            worker,
            metrics: None,
        }
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Serve `GET /metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("worker", &*self.worker.borrow())
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}
