//! Extension capability for specialised fetchers.
//!
//! The state machine calls an extension at two points: when deciding whether
//! a `fetch()` may start, and right after a successful or failed settlement
//! has been written to state but before the public hooks run. Pagination is
//! built on it; a plain fetcher uses `()`.

/// Capability a fetcher consults at its extension points.
///
/// `R` is the raw (un-piped) response type.
///
/// # Example
///
/// ```
/// use composable_fetch_core::extension::FetchExtension;
///
/// #[derive(Debug, Default)]
/// struct CountSuccesses(usize);
///
/// impl<R> FetchExtension<R> for CountSuccesses {
///     fn on_success(&mut self, _response: &R) {
///         self.0 += 1;
///     }
/// }
/// ```
pub trait FetchExtension<R>: Send + 'static {
    /// Extra gate condition, combined with the concurrency gate.
    fn permits(&self) -> bool {
        true
    }

    /// Observe the raw response of a successful attempt.
    fn on_success(&mut self, _response: &R) {}

    /// Observe a final failure (retries exhausted).
    fn on_failure(&mut self) {}
}

impl<R> FetchExtension<R> for () {}
