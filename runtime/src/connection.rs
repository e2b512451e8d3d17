//! Process-wide broker connection lifecycle.
//!
//! [`ConnectionManager`] owns the single connection + channel pair the producer and the
//! worker share. The pair is created lazily on the first [`acquire_channel`] call and
//! memoized until a borrower reports it broken ([`invalidate`]) or the process shuts down
//! ([`close`]).
//!
//! # Single-flight
//!
//! Healthy lookups only take a short read lock. A miss takes an async mutex that is held
//! across the whole connect, so concurrent first callers wait for one creation attempt
//! instead of each opening their own connection.
//!
//! # Generations
//!
//! Every pair gets a monotonically increasing generation number. Borrowers that configure
//! the channel (the producer declares its queue once per channel) compare generations to
//! notice a replacement, and [`invalidate`] only drops the pair if it is still the one the
//! caller saw fail.
//!
//! [`acquire_channel`]: ConnectionManager::acquire_channel
//! [`invalidate`]: ConnectionManager::invalidate
//! [`close`]: ConnectionManager::close

use crate::metrics::PipelineMetrics;
use order_relay_core::broker::{BrokerChannel, ConnectionError, Connector};
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// A borrowed channel plus the generation it belongs to.
#[derive(Debug)]
pub struct ChannelLease<Ch> {
    channel: Arc<Ch>,
    generation: u64,
}

impl<Ch> ChannelLease<Ch> {
    /// Generation of the underlying connection + channel pair (starts at 1).
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl<Ch> Clone for ChannelLease<Ch> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            generation: self.generation,
        }
    }
}

impl<Ch> Deref for ChannelLease<Ch> {
    type Target = Ch;

    fn deref(&self) -> &Ch {
        &self.channel
    }
}

/// Owns and memoizes the broker channel.
///
/// # Example
///
/// ```
/// use order_relay_runtime::ConnectionManager;
/// use order_relay_testing::InMemoryBroker;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let manager = ConnectionManager::new(broker.clone());
///
/// let first = manager.acquire_channel().await?;
/// let second = manager.acquire_channel().await?;
/// assert_eq!(first.generation(), second.generation());
/// assert_eq!(broker.connections_opened(), 1);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<C: Connector> {
    connector: C,
    current: RwLock<Option<ChannelLease<C::Channel>>>,
    creating: Mutex<()>,
    generations: std::sync::atomic::AtomicU64,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager; nothing is opened until the first acquire.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            current: RwLock::new(None),
            creating: Mutex::new(()),
            generations: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Return the memoized channel if it is healthy, otherwise open a new one.
    ///
    /// # Errors
    ///
    /// Returns the [`ConnectionError`] from the connector unchanged. Nothing is retried
    /// here; the next call makes a fresh attempt.
    pub async fn acquire_channel(&self) -> Result<ChannelLease<C::Channel>, ConnectionError> {
        if let Some(lease) = self.healthy() {
            return Ok(lease);
        }

        let _creating = self.creating.lock().await;

        // Another caller may have finished creating while we waited
        if let Some(lease) = self.healthy() {
            return Ok(lease);
        }

        if let Some(stale) = self.take() {
            tracing::warn!(
                generation = stale.generation,
                "Broker channel is no longer open, replacing it"
            );
            Self::close_quietly(&stale).await;
        }

        let target = self.connector.target();
        tracing::info!(broker = %target, "Opening broker connection");

        let channel = self.connector.connect().await.map_err(|e| {
            tracing::error!(broker = %target, error = %e, "Broker connection failed");
            e
        })?;

        let generation = self
            .generations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let lease = ChannelLease {
            channel: Arc::new(channel),
            generation,
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(lease.clone());

        PipelineMetrics::record_connection_opened();
        tracing::info!(broker = %target, generation, "Broker channel established");
        Ok(lease)
    }

    /// Drop the channel of `generation` after a borrower saw it fail.
    ///
    /// A newer generation is left alone, so a late report cannot tear down a healthy
    /// replacement.
    pub async fn invalidate(&self, generation: u64) {
        let _creating = self.creating.lock().await;

        let stale = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|lease| lease.generation == generation) {
                current.take()
            } else {
                None
            }
        };

        if let Some(stale) = stale {
            tracing::warn!(generation, "Broker channel invalidated");
            Self::close_quietly(&stale).await;
        }
    }

    /// Close the channel and then the connection.
    ///
    /// The manager stays usable; a later acquire opens a new pair.
    pub async fn close(&self) {
        let _creating = self.creating.lock().await;

        if let Some(lease) = self.take() {
            match lease.close().await {
                Ok(()) => tracing::info!(generation = lease.generation, "Broker connection closed"),
                Err(e) => tracing::warn!(
                    generation = lease.generation,
                    error = %e,
                    "Broker connection did not close cleanly"
                ),
            }
        }
    }

    /// Generation of the memoized channel, if one is held.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ChannelLease::generation)
    }

    /// Redacted broker target, for logs and health output.
    #[must_use]
    pub fn target(&self) -> String {
        self.connector.target()
    }

    fn healthy(&self) -> Option<ChannelLease<C::Channel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|lease| lease.is_open())
            .cloned()
    }

    fn take(&self) -> Option<ChannelLease<C::Channel>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn close_quietly(lease: &ChannelLease<C::Channel>) {
        if let Err(e) = lease.close().await {
            tracing::debug!(generation = lease.generation, error = %e, "Ignoring close error on stale channel");
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.connector.target())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
