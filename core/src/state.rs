//! Observable fetch state.
//!
//! [`FetchState`] is the record hooks and callers read. Only the state
//! machine holds it mutably; everyone else sees `&FetchState`, so the
//! transition methods below are effectively private to the runtime.

use crate::config::FetchPolicy;

/// State of one fetcher.
///
/// # Type Parameters
///
/// - `D`: Piped response type stored in `data`
/// - `E`: Request error type stored in `error`
/// - `X`: Extension state (e.g. pagination), `()` for a plain fetcher
#[derive(Debug, Clone)]
pub struct FetchState<D, E, X = ()> {
    policy: FetchPolicy,
    fetching: bool,
    fetched: bool,
    data: Option<D>,
    error: Option<E>,
    retry_times: usize,
    extension: X,
}

impl<D, E, X> FetchState<D, E, X> {
    /// Create an idle state.
    #[must_use]
    pub const fn new(policy: FetchPolicy, extension: X) -> Self {
        Self {
            policy,
            fetching: false,
            fetched: false,
            data: None,
            error: None,
            retry_times: 0,
            extension,
        }
    }

    /// Current policy
    #[must_use]
    pub const fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// `true` between gate-pass and settlement of the current attempt
    #[must_use]
    pub const fn fetching(&self) -> bool {
        self.fetching
    }

    /// `true` once any attempt has succeeded
    #[must_use]
    pub const fn fetched(&self) -> bool {
        self.fetched
    }

    /// Last successful (piped) response
    #[must_use]
    pub const fn data(&self) -> Option<&D> {
        self.data.as_ref()
    }

    /// Last terminal failure
    #[must_use]
    pub const fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// Retries used by the most recent attempt chain
    #[must_use]
    pub const fn retry_times(&self) -> usize {
        self.retry_times
    }

    /// Extension state
    #[must_use]
    pub const fn extension(&self) -> &X {
        &self.extension
    }

    /// Mutable extension state
    pub const fn extension_mut(&mut self) -> &mut X {
        &mut self.extension
    }

    /// Replace the policy. Takes effect from the next `fetch()`.
    pub const fn set_policy(&mut self, policy: FetchPolicy) {
        self.policy = policy;
    }

    /// Concurrency gate: open unless overlap is disallowed and an attempt is in flight.
    #[must_use]
    pub const fn admits_overlap(&self) -> bool {
        self.policy.concurrent || !self.fetching
    }

    /// Enter Pending for a new top-level attempt chain.
    pub const fn begin_chain(&mut self) {
        self.retry_times = 0;
        self.fetching = true;
    }

    /// Leave a failed attempt and re-enter Pending for the next retry.
    pub const fn begin_retry(&mut self) {
        self.retry_times += 1;
        self.fetching = true;
    }

    /// Record a successful attempt.
    pub fn succeed(&mut self, data: D) {
        self.fetching = false;
        self.fetched = true;
        self.data = Some(data);
    }

    /// Record a final failure.
    pub fn fail(&mut self, error: E) {
        self.fetching = false;
        self.error = Some(error);
    }

    /// Leave Pending without an outcome (the chain panicked).
    ///
    /// `data` and `error` keep their last values.
    pub const fn abort(&mut self) {
        self.fetching = false;
    }
}

impl<D, E, X: Default> Default for FetchState<D, E, X> {
    fn default() -> Self {
        Self::new(FetchPolicy::default(), X::default())
    }
}
