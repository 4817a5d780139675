//! # Composable Fetch Runtime
//!
//! Runtime implementation of the request lifecycle controller.
//!
//! This crate provides the async machinery that drives the types defined in
//! `composable-fetch-core`.
//!
//! ## Core Components
//!
//! - **`CancellablePromise`**: A settle-once spawned future that can be
//!   rejected from outside
//! - **`TimeoutPromise`**: A cancellable promise raced against a deadline
//! - **`Fetcher`**: The gate → pending → request → pipe → retry → timeout
//!   state machine, with lifecycle hooks
//! - **`ListFetcher`**: A `Fetcher` that tracks pages and stops when the
//!   last page is reached
//! - **Metrics**: Prometheus counters for attempts, retries, blocks and timeouts
//!
//! ## Example
//!
//! ```rust
//! use composable_fetch_runtime::{FetchError, Fetcher};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let fetcher = Fetcher::builder(|| async {
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     Ok::<_, String>(42)
//! })
//! .concurrent(false)
//! .timeout(Duration::from_secs(1))
//! .build();
//!
//! let first = fetcher.fetch();
//! // A second call while the first is in flight is rejected.
//! assert_eq!(fetcher.fetch().await, Err(FetchError::Blocked));
//!
//! assert_eq!(first.await, Ok(42));
//! # }
//! ```

/// Settle-once cancellable and timeout promises
pub mod promise;

/// Request lifecycle state machine
pub mod fetcher;

/// Pagination on top of [`Fetcher`]
pub mod list_fetcher;

/// Prometheus metrics for observability
pub mod metrics;

pub use fetcher::{FetchFuture, Fetcher, FetcherBuilder};
pub use list_fetcher::{ListFetcher, Pagination};
pub use promise::{CancelHandle, CancellablePromise, Resolver, TimeoutPromise};

// Re-export the core vocabulary so most users need a single dependency
pub use composable_fetch_core::{
    Change, Completion, FetchError, FetchExtension, FetchPolicy, FetchState, Hooks, Interrupted,
    Status,
};
