//! # Composable Fetch Core
//!
//! Core types for the composable-fetch request lifecycle.
//!
//! This crate holds the vocabulary shared by the runtime and by user code:
//! it describes *what* a fetcher is configured with and *what* it exposes,
//! without running anything itself.
//!
//! ## Core Concepts
//!
//! - **Request**: A caller-supplied zero-argument async operation (the only IO seam)
//! - **Response pipe**: A pure transform applied to each successful raw response
//! - **Policy**: Concurrency, timeout and retry settings ([`config::FetchPolicy`])
//! - **State**: The observable `fetching`/`fetched`/`data`/`error` record ([`state::FetchState`])
//! - **Hooks**: Optional lifecycle callbacks ([`hooks::Hooks`])
//! - **Extension**: A capability that can narrow the gate and observe raw
//!   responses ([`extension::FetchExtension`]), used for pagination
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──gate──▶ Pending ──▶ Success
//!                  ▲   │
//!                  └───┴───▶ Failure (retry re-enters Pending while budget remains)
//! ```
//!
//! ## Example
//!
//! ```
//! use composable_fetch_core::config::FetchPolicy;
//! use std::time::Duration;
//!
//! let policy = FetchPolicy::builder()
//!     .concurrent(false)
//!     .timeout(Duration::from_secs(2))
//!     .max_retry_times(3)
//!     .build();
//!
//! assert_eq!(policy.deadline(), Some(Duration::from_secs(2)));
//! ```

/// Fetch policy configuration (concurrency, timeout, retries)
pub mod config;

/// Error taxonomy: gate blocks, interruptions and request failures
pub mod error;

/// Extension capability used to specialise a fetcher (e.g. pagination)
pub mod extension;

/// Lifecycle hooks
pub mod hooks;

/// Observable fetch state
pub mod state;

/// Lifecycle statuses and hook payloads
pub mod status;

/// Request module - The IO seam consumed by the fetcher
///
/// A request is any `Fn() -> Future<Output = Result<R, E>>`. The runtime
/// stores it type-erased so a fetcher can call it once per attempt.
pub mod request {
    use futures::future::BoxFuture;
    use std::sync::Arc;

    /// Boxed future produced by one invocation of a request.
    pub type RequestFuture<R, E> = BoxFuture<'static, Result<R, E>>;

    /// Type-erased request operation.
    pub type Request<R, E> = Arc<dyn Fn() -> RequestFuture<R, E> + Send + Sync>;

    /// Type-erased response pipe.
    ///
    /// Receives the raw response and the previously stored data, which makes
    /// accumulation (e.g. appending list pages) possible without reaching
    /// back into the fetcher.
    pub type ResponsePipe<R, D> = Arc<dyn Fn(&R, Option<&D>) -> D + Send + Sync>;

    /// Build the identity pipe used when no transform is configured.
    #[must_use]
    pub fn identity<R: Clone>() -> ResponsePipe<R, R> {
        Arc::new(|response: &R, _previous: Option<&R>| response.clone())
    }
}

// Re-export commonly used types
pub use config::FetchPolicy;
pub use error::{FetchError, Interrupted};
pub use extension::FetchExtension;
pub use hooks::Hooks;
pub use state::FetchState;
pub use status::{Change, Completion, Status};
