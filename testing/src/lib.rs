//! # Composable Fetch Testing
//!
//! Testing utilities and helpers for composable-fetch.
//!
//! This crate provides:
//! - Scripted request mocks that count their calls
//! - Recorders for hook invocations
//! - Property-based testing strategies for fetch policies
//! - A one-line tracing setup for tests
//!
//! ## Example
//!
//! ```ignore
//! use composable_fetch_runtime::Fetcher;
//! use composable_fetch_testing::MockRequest;
//!
//! #[tokio::test]
//! async fn test_retry_recovers() {
//!     let mock = MockRequest::failing_first(2, "ok");
//!     let fetcher = Fetcher::builder(mock.request()).max_retry_times(2).build();
//!
//!     assert_eq!(fetcher.fetch().await, Ok("ok".to_string()));
//!     assert_eq!(mock.calls(), 3);
//! }
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Mock implementations of the request seam.
pub mod mocks {
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Scripted request returning `String` responses and `String` errors.
    ///
    /// The first `fail_first` calls fail, every later call succeeds. Clones
    /// share the call counter.
    ///
    /// # Example
    ///
    /// ```
    /// use composable_fetch_testing::mocks::MockRequest;
    ///
    /// # tokio_test::block_on(async {
    /// let mock = MockRequest::failing_first(1, "ok");
    /// assert_eq!(mock.call().await, Err("request 1 failed".to_string()));
    /// assert_eq!(mock.call().await, Ok("ok".to_string()));
    /// assert_eq!(mock.calls(), 2);
    /// # });
    /// ```
    #[derive(Debug, Clone)]
    pub struct MockRequest {
        response: String,
        fail_first: usize,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl MockRequest {
        /// Always succeeds with `response`
        #[must_use]
        pub fn succeeding(response: impl Into<String>) -> Self {
            Self::failing_first(0, response)
        }

        /// Always fails
        #[must_use]
        pub fn failing() -> Self {
            Self::failing_first(usize::MAX, String::new())
        }

        /// Fails `count` times, then succeeds with `response`
        #[must_use]
        pub fn failing_first(count: usize, response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                fail_first: count,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Sleep for `delay` before settling each call
        #[must_use]
        pub const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Number of calls so far
        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Issue one call.
        ///
        /// Failures carry the 1-based call number: `"request N failed"`.
        pub fn call(&self) -> BoxFuture<'static, Result<String, String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fails = call <= self.fail_first;
            let response = self.response.clone();
            let delay = self.delay;

            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if fails {
                    Err(format!("request {call} failed"))
                } else {
                    Ok(response)
                }
            }
            .boxed()
        }

        /// The mock as a request closure for `Fetcher::builder`
        pub fn request(
            &self,
        ) -> impl Fn() -> BoxFuture<'static, Result<String, String>> + Send + Sync + 'static + use<>
        {
            let mock = self.clone();
            move || mock.call()
        }
    }

    /// Paged request: call `n` returns `pages[n]`, and fails past the end.
    #[derive(Debug, Clone)]
    pub struct MockPages {
        pages: Arc<Vec<Vec<u32>>>,
        calls: Arc<AtomicUsize>,
    }

    impl MockPages {
        /// Serve `pages` in order
        #[must_use]
        pub fn new(pages: Vec<Vec<u32>>) -> Self {
            Self {
                pages: Arc::new(pages),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Number of calls so far
        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Issue one call
        pub fn call(&self) -> BoxFuture<'static, Result<Vec<u32>, String>> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let page = self
                .pages
                .get(index)
                .cloned()
                .ok_or_else(|| format!("no page at index {index}"));
            futures::future::ready(page).boxed()
        }

        /// The mock as a request closure for `ListFetcher::paginated`
        pub fn request(
            &self,
        ) -> impl Fn() -> BoxFuture<'static, Result<Vec<u32>, String>> + Send + Sync + 'static + use<>
        {
            let mock = self.clone();
            move || mock.call()
        }
    }
}

/// Recorders for hook invocations.
pub mod helpers {
    use composable_fetch_core::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Shared counter for hooks that only need to be counted.
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        /// New counter at zero
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add one
        pub fn increment(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        /// Current count
        #[must_use]
        pub fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Ordered log of lifecycle statuses, usually fed from `on_change`.
    #[derive(Debug, Clone, Default)]
    pub struct StatusLog(Arc<Mutex<Vec<Status>>>);

    impl StatusLog {
        /// Empty log
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Append a status
        pub fn push(&self, status: Status) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(status);
        }

        /// Copy of everything recorded so far
        #[must_use]
        pub fn snapshot(&self) -> Vec<Status> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// How many times `status` was recorded
        #[must_use]
        pub fn count(&self, status: Status) -> usize {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|s| **s == status)
                .count()
        }
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use composable_fetch_core::FetchPolicy;
    use proptest::prelude::*;

    /// Retry budgets small enough to run quickly
    pub fn retry_budget() -> impl Strategy<Value = usize> {
        0usize..6
    }

    /// Arbitrary policy with a small retry budget and a short or absent deadline
    pub fn fetch_policy() -> impl Strategy<Value = FetchPolicy> {
        (any::<bool>(), prop_oneof![Just(0u64), 1u64..500], retry_budget()).prop_map(
            |(concurrent, timeout_ms, max_retry_times)| FetchPolicy {
                concurrent,
                timeout_ms,
                max_retry_times,
            },
        )
    }
}

/// Install a `fmt` subscriber for tests, filtered by `RUST_LOG` (default `debug`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "composable_fetch_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// Re-export commonly used items
pub use helpers::{CallCounter, StatusLog};
pub use mocks::{MockPages, MockRequest};
