//! # Order Relay Testing
//!
//! Test doubles and fixtures for the order relay.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a single-node broker with failure injection
//! - [`RecordingPublisher`]: captures published orders, can be told to fail
//! - [`FixedClock`]: deterministic time
//! - [`fixtures`]: sample orders
//!
//! ## Example
//!
//! ```
//! use order_relay_testing::{fixtures, InMemoryBroker, RecordingPublisher};
//! use order_relay_core::OrderPublisher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let publisher = RecordingPublisher::new();
//! publisher.publish(&fixtures::sample_order()).await?;
//! assert_eq!(publisher.published().len(), 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use order_relay_core::environment::Clock;

pub mod broker;
pub mod fixtures;
pub mod publisher;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use order_relay_testing::mocks::FixedClock;
    /// use order_relay_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2024-01-01 10:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use broker::{InMemoryBroker, InMemoryChannel};
pub use mocks::{FixedClock, test_clock};
pub use publisher::RecordingPublisher;
