//! # Chama Testing
//!
//! Testing utilities and helpers for the chama client architecture.
//!
//! This crate provides:
//! - Deterministic implementations of the environment traits (fixed clock,
//!   sequential ids)
//! - Scriptable doubles for the lifecycle's collaborators (location,
//!   backend, durable storage)
//! - The fluent [`ReducerTest`] Given/When/Then harness
//!
//! ## Example
//!
//! ```ignore
//! use chama_testing::{test_clock, lifecycle_mocks::test_environment};
//! use chama_runtime::Store;
//!
//! #[tokio::test]
//! async fn test_request_flow() {
//!     let env = test_environment();
//!     let store = Store::new(MatchingState::default(), MatchingReducer::new(), env);
//!
//!     store.send(MatchingAction::AcquireLocation).await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use chama_core::environment::{Clock, IdGenerator};

/// Scriptable doubles for the lifecycle's collaborators
pub mod lifecycle_mocks;

/// Fluent reducer test harness
pub mod reducer_test;

/// Deterministic implementations of the environment traits.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use chama_testing::mocks::FixedClock;
    /// use chama_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
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

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when a test advances it.
    ///
    /// Starts at the [`test_clock`] instant. Clones share the offset, so a
    /// clock handed to a cache or environment can be advanced from the test.
    #[derive(Debug, Clone, Default)]
    pub struct SteppingClock {
        offset_ms: std::sync::Arc<std::sync::atomic::AtomicI64>,
    }

    impl SteppingClock {
        /// A clock at the test epoch
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Move the clock forward
        pub fn advance(&self, duration: std::time::Duration) {
            let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
            self.offset_ms
                .fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            test_clock().now()
                + chrono::Duration::milliseconds(
                    self.offset_ms.load(std::sync::atomic::Ordering::SeqCst),
                )
        }
    }

    /// Predictable id generator: `id-1`, `id-2`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        next: AtomicUsize,
    }

    impl SequentialIdGenerator {
        /// Create a generator starting at `id-1`
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicUsize::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            format!("id-{n}")
        }
    }
}

/// Install a compact tracing subscriber for a test run.
///
/// Safe to call from multiple tests; only the first call installs.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .compact()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, SequentialIdGenerator, SteppingClock, test_clock};
pub use reducer_test::ReducerTest;

#[cfg(test)]
mod tests {
    use super::*;
    use chama_core::environment::{Clock, IdGenerator};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIdGenerator::new();
        assert_eq!(ids.next_id(), "id-1");
        assert_eq!(ids.next_id(), "id-2");
    }
}
