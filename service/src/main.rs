//! Order relay HTTP server.
//!
//! Waiter terminals post orders, the producer publishes them to RabbitMQ, the worker
//! consumes them into the kitchen store, and the kitchen display reads them back.

use order_relay_amqp::AmqpConnector;
use order_relay_projections::KitchenOrderStore;
use order_relay_runtime::{ConnectionManager, Producer, Worker, WorkerConfig, metrics};
use order_relay_service::{Config, DEFAULT_LOG_FILTER, ServerConfig};
use order_relay_web::{AppState, router};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting order relay");

    let config = Config::from_env()?;
    info!(
        profile = %config.amqp.profile,
        broker = %config.amqp.redacted(),
        queue = %config.queue.name,
        dead_letter = config.queue.dead_letter.as_deref().unwrap_or(""),
        "Configuration loaded"
    );

    let prometheus = metrics::install_recorder()?;

    // One connection shared by the producer and the worker, opened on first use
    let manager = Arc::new(ConnectionManager::new(AmqpConnector::new(
        config.amqp.clone(),
    )));
    let store = Arc::new(KitchenOrderStore::new());
    let producer = Arc::new(Producer::new(Arc::clone(&manager), config.queue.clone()));

    let worker = Worker::new(
        Arc::clone(&manager),
        store.clone(),
        WorkerConfig::new(config.queue.clone()).with_prefetch(config.worker_prefetch),
    )
    .spawn();

    let state = AppState::new(store, producer, worker.state_receiver()).with_metrics(prometheus);

    let served = serve(&config.server, router(state)).await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }

    info!("Stopping worker");
    worker.stop(config.server.shutdown_grace()).await;
    manager.close().await;

    info!("Order relay stopped");
    served
}

async fn serve(config: &ServerConfig, app: axum::Router) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
