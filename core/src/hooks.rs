//! Lifecycle hooks.
//!
//! Every hook is optional and receives the fetcher's [`FetchState`] as it is
//! *after* the transition being reported, so a hook can read `fetching`,
//! `data`, `error` and extension state directly.
//!
//! Hooks run synchronously right after the transition, on a snapshot of the
//! state taken under the lock. The lock is released before dispatch, so a
//! hook may call back into the fetcher (read it, or start the next `fetch()`).
//!
//! # Dispatch order
//!
//! ```text
//! Pending:  state → on_pending → on_change(Pending)
//! Success:  state → extension → on_success → on_change(Success) → on_complete(Ok)
//! Failure:  state → extension → on_failure → on_change(Failure) → on_complete(Err)
//! Timeout:  on_timeout (when the caller's future observes the deadline)
//! ```

use crate::state::FetchState;
use crate::status::{Change, Completion};
use std::fmt;
use std::sync::Arc;

type StateHook<D, E, X> = Arc<dyn Fn(&FetchState<D, E, X>) + Send + Sync>;
type DataHook<D, E, X> = Arc<dyn Fn(&FetchState<D, E, X>, &D) + Send + Sync>;
type ErrorHook<D, E, X> = Arc<dyn Fn(&FetchState<D, E, X>, &E) + Send + Sync>;
type CompleteHook<D, E, X> =
    Arc<dyn Fn(&FetchState<D, E, X>, Completion<'_, D, E>) + Send + Sync>;
type ChangeHook<D, E, X> = Arc<dyn Fn(&FetchState<D, E, X>, Change<'_, D, E>) + Send + Sync>;

/// Set of optional lifecycle callbacks.
///
/// # Example
///
/// ```
/// use composable_fetch_core::hooks::Hooks;
///
/// let hooks: Hooks<String, String> = Hooks::new()
///     .on_pending(|state| assert!(state.fetching()))
///     .on_success(|state, data| assert_eq!(state.data(), Some(data)));
/// ```
pub struct Hooks<D, E, X = ()> {
    on_pending: Option<StateHook<D, E, X>>,
    on_success: Option<DataHook<D, E, X>>,
    on_failure: Option<ErrorHook<D, E, X>>,
    on_complete: Option<CompleteHook<D, E, X>>,
    on_change: Option<ChangeHook<D, E, X>>,
    on_timeout: Option<StateHook<D, E, X>>,
}

impl<D, E, X> Hooks<D, E, X> {
    /// Create an empty hook set (every hook is a no-op).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            on_pending: None,
            on_success: None,
            on_failure: None,
            on_complete: None,
            on_change: None,
            on_timeout: None,
        }
    }

    /// Called on every Pending entry, retries included.
    #[must_use]
    pub fn on_pending<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>) + Send + Sync + 'static,
    {
        self.on_pending = Some(Arc::new(hook));
        self
    }

    /// Called once per successful chain with the piped data.
    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, &D) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Called once per failed chain, after retries are exhausted.
    #[must_use]
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, &E) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Called after `on_success`/`on_failure` and `on_change`.
    #[must_use]
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, Completion<'_, D, E>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Called on every Pending entry and on every terminal settlement.
    #[must_use]
    pub fn on_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, Change<'_, D, E>) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(hook));
        self
    }

    /// Called when the caller's future is rejected by the deadline.
    #[must_use]
    pub fn on_timeout<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(hook));
        self
    }

    /// `true` when no hook is set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.on_pending.is_none()
            && self.on_success.is_none()
            && self.on_failure.is_none()
            && self.on_complete.is_none()
            && self.on_change.is_none()
            && self.on_timeout.is_none()
    }

    /// Dispatch `on_pending` then `on_change(Pending)`.
    pub fn pending(&self, state: &FetchState<D, E, X>) {
        if let Some(hook) = &self.on_pending {
            hook(state);
        }
        self.change(state, Change::Pending);
    }

    /// Dispatch `on_success`, `on_change(Success)`, `on_complete(Ok)`.
    pub fn success(&self, state: &FetchState<D, E, X>, data: &D) {
        if let Some(hook) = &self.on_success {
            hook(state, data);
        }
        self.change(state, Change::Success(data));
        if let Some(hook) = &self.on_complete {
            hook(state, Completion::Ok(data));
        }
    }

    /// Dispatch `on_failure`, `on_change(Failure)`, `on_complete(Err)`.
    pub fn failure(&self, state: &FetchState<D, E, X>, error: &E) {
        if let Some(hook) = &self.on_failure {
            hook(state, error);
        }
        self.change(state, Change::Failure(error));
        if let Some(hook) = &self.on_complete {
            hook(state, Completion::Err(error));
        }
    }

    /// Dispatch `on_timeout`.
    pub fn timeout(&self, state: &FetchState<D, E, X>) {
        if let Some(hook) = &self.on_timeout {
            hook(state);
        }
    }

    fn change(&self, state: &FetchState<D, E, X>, change: Change<'_, D, E>) {
        if let Some(hook) = &self.on_change {
            hook(state, change);
        }
    }
}

impl<D, E, X> Default for Hooks<D, E, X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, E, X> Clone for Hooks<D, E, X> {
    fn clone(&self) -> Self {
        Self {
            on_pending: self.on_pending.clone(),
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
            on_complete: self.on_complete.clone(),
            on_change: self.on_change.clone(),
            on_timeout: self.on_timeout.clone(),
        }
    }
}

// Manual Debug implementation since closures don't implement Debug
impl<D, E, X> fmt::Debug for Hooks<D, E, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_pending", &self.on_pending.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}
