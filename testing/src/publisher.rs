//! Publisher double for HTTP-layer tests.

use order_relay_core::{BoxFuture, Order, OrderPublisher, PublishError};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct Inner {
    published: Vec<Order>,
    fail_with: Option<PublishError>,
}

/// Records every order handed to it.
///
/// Cloning shares the recording. [`fail_with`](Self::fail_with) makes every subsequent
/// publish return the given error until [`succeed`](Self::succeed) is called.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingPublisher {
    /// Create a publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish with `error`.
    pub fn fail_with(&self, error: PublishError) {
        self.lock().fail_with = Some(error);
    }

    /// Accept publishes again.
    pub fn succeed(&self) {
        self.lock().fail_with = None;
    }

    /// Orders accepted so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<Order> {
        self.lock().published.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RecordingPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingPublisher")
            .field("published", &self.lock().published.len())
            .finish_non_exhaustive()
    }
}

impl OrderPublisher for RecordingPublisher {
    fn publish<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some(error) = &inner.fail_with {
                return Err(error.clone());
            }
            inner.published.push(order.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use order_relay_core::ConnectionError;

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let publisher = RecordingPublisher::new();
        publisher.publish(&fixtures::sample_order()).await.unwrap();

        publisher.fail_with(PublishError::Connection(ConnectionError::Unreachable {
            target: "amqp://localhost:5672/".to_string(),
            reason: "refused".to_string(),
        }));
        assert!(publisher.publish(&fixtures::sample_order()).await.is_err());

        publisher.succeed();
        publisher.publish(&fixtures::sample_order()).await.unwrap();
        assert_eq!(publisher.published().len(), 2);
    }
}
