//! Request lifecycle state machine.
//!
//! A [`Fetcher`] owns one request operation and drives it through
//!
//! ```text
//! gate → Pending → request → pipe → Success
//!                     │
//!                     └─ failure → retry (re-enter Pending) | Failure
//! ```
//!
//! with the whole attempt chain raced against an optional deadline
//! ([`TimeoutPromise`]).
//!
//! # Concurrency
//!
//! Each transition mutates state under one lock, between suspension points,
//! and hooks then run on a snapshot of the post-transition state taken under
//! that same lock. The lock is released before dispatch, so hooks may call
//! back into the fetcher. Overlapping `fetch()` calls either all run (`concurrent = true`)
//! or the later ones are rejected with [`FetchError::Blocked`]; nothing is
//! queued.
//!
//! # Example
//!
//! ```rust
//! use composable_fetch_runtime::Fetcher;
//!
//! # async fn example() {
//! let fetcher = Fetcher::builder(|| async { Ok::<_, String>("response".to_string()) })
//!     .max_retry_times(2)
//!     .on_success(|state, data| {
//!         assert!(state.fetched());
//!         assert_eq!(data, "response");
//!     })
//!     .build();
//!
//! let data = fetcher.fetch().await;
//! assert_eq!(data, Ok("response".to_string()));
//! assert_eq!(fetcher.data(), Some("response".to_string()));
//! # }
//! ```

use crate::metrics::FetchMetrics;
use crate::promise::TimeoutPromise;
use composable_fetch_core::request::{self, Request, ResponsePipe};
use composable_fetch_core::{
    Change, Completion, FetchError, FetchExtension, FetchPolicy, FetchState, Hooks, Interrupted,
};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture<D, E> = BoxFuture<'static, Result<D, FetchError<E>>>;

/// Request lifecycle controller.
///
/// # Type Parameters
///
/// - `R`: Raw response type produced by the request
/// - `D`: Piped data type stored in state and returned to callers
/// - `E`: Request error type
/// - `X`: Extension consulted at the gate and after settlement
///
/// Cloning a `Fetcher` yields another handle to the same state.
pub struct Fetcher<R, D, E, X = ()> {
    inner: Arc<Inner<R, D, E, X>>,
}

/// Internal: shared by every handle and by running attempt chains.
struct Inner<R, D, E, X> {
    request: RwLock<Request<R, E>>,
    pipe: RwLock<ResponsePipe<R, D>>,
    hooks: RwLock<Hooks<D, E, X>>,
    state: Mutex<FetchState<D, E, X>>,
}

impl<R, E> Fetcher<R, R, E, ()>
where
    R: Clone + Send + 'static,
    E: Send + 'static,
{
    /// Start building a fetcher that stores responses unchanged.
    pub fn builder<F, Fut>(request: F) -> FetcherBuilder<R, R, E, ()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        FetcherBuilder::new(erase_request(request), request::identity(), ())
    }
}

impl<R, D, E> Fetcher<R, D, E, ()>
where
    R: Send + 'static,
    E: Send + 'static,
{
    /// Start building a fetcher that transforms each response with `pipe`.
    ///
    /// The pipe receives the raw response and the previously stored data.
    pub fn piped<F, Fut, P>(request: F, pipe: P) -> FetcherBuilder<R, D, E, ()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        P: Fn(&R, Option<&D>) -> D + Send + Sync + 'static,
    {
        FetcherBuilder::new(erase_request(request), Arc::new(pipe), ())
    }
}

impl<R, D, E, X> Fetcher<R, D, E, X>
where
    R: Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
    X: FetchExtension<R> + Clone,
{
    /// Start an attempt chain.
    ///
    /// The gate and the first Pending transition run synchronously, before
    /// this returns: `on_pending` has already fired when you get the future.
    /// The chain itself runs on a spawned task and keeps running if the
    /// returned future is dropped or loses the race against the deadline.
    ///
    /// # Errors
    ///
    /// The returned future fails with:
    /// - [`FetchError::Blocked`] if the gate rejected the call (no hooks fire)
    /// - [`FetchError::Interrupted`] with a timeout if the deadline elapsed first
    /// - [`FetchError::Interrupted`] with a panic if the request, the pipe or a
    ///   hook panicked inside the chain (no further hooks fire)
    /// - [`FetchError::Request`] with the request's error once retries are exhausted
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime, and re-raises a panic
    /// from `on_pending`/`on_change` for the first Pending entry after
    /// leaving Pending.
    pub fn fetch(&self) -> FetchFuture<D, E> {
        let Some(policy) = self.inner.enter_chain() else {
            FetchMetrics::record_blocked();
            tracing::debug!("Fetch blocked by request gate");
            return future::ready(Err(FetchError::Blocked)).boxed();
        };

        let span = tracing::debug_span!(
            "fetch_chain",
            max_retry_times = policy.max_retry_times,
            timeout_ms = policy.timeout_ms
        );
        let inner = Arc::clone(&self.inner);
        let chain = async move {
            let attempts = Arc::clone(&inner).run_chain(policy.max_retry_times);
            match AssertUnwindSafe(attempts).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(inner.abort_chain(panic.as_ref()).into()),
            }
        }
        .instrument(span);

        let deadline = policy.timeout();
        let promise = TimeoutPromise::new(chain, deadline);
        let inner = Arc::clone(&self.inner);

        async move {
            let outcome = promise.await;
            if matches!(&outcome, Err(error) if error.is_timeout()) {
                inner.report_timeout(deadline);
            }
            outcome
        }
        .boxed()
    }
}

impl<R, D, E, X> Fetcher<R, D, E, X>
where
    R: Send + 'static,
    E: Send + 'static,
{
    /// Replace the request. Takes effect from the next attempt, retries included.
    pub fn set_request<F, Fut>(&self, request: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        *write(&self.inner.request) = erase_request(request);
    }

    /// Replace the response pipe. Takes effect from the next success.
    pub fn set_pipe<P>(&self, pipe: P)
    where
        P: Fn(&R, Option<&D>) -> D + Send + Sync + 'static,
    {
        *write(&self.inner.pipe) = Arc::new(pipe);
    }

    /// Replace the whole hook set. Takes effect from the next transition.
    pub fn set_hooks(&self, hooks: Hooks<D, E, X>) {
        *write(&self.inner.hooks) = hooks;
    }
}

impl<R, D, E, X> Fetcher<R, D, E, X> {
    /// Read state through a closure.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (fetching, has_data) = fetcher.state(|s| (s.fetching(), s.data().is_some()));
    /// ```
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&FetchState<D, E, X>) -> T,
    {
        f(&self.inner.lock_state())
    }

    /// `true` between gate-pass and settlement of the current attempt
    #[must_use]
    pub fn fetching(&self) -> bool {
        self.state(FetchState::fetching)
    }

    /// `true` once any attempt has succeeded
    #[must_use]
    pub fn fetched(&self) -> bool {
        self.state(FetchState::fetched)
    }

    /// Retries used by the most recent attempt chain
    #[must_use]
    pub fn retry_times(&self) -> usize {
        self.state(FetchState::retry_times)
    }

    /// Current policy
    #[must_use]
    pub fn policy(&self) -> FetchPolicy {
        self.state(|s| *s.policy())
    }

    /// Replace the policy. Chains already running keep the policy they started with.
    pub fn set_policy(&self, policy: FetchPolicy) {
        tracing::debug!(?policy, "Fetch policy replaced");
        self.inner.lock_state().set_policy(policy);
    }

    /// Last successful (piped) response
    #[must_use]
    pub fn data(&self) -> Option<D>
    where
        D: Clone,
    {
        self.state(|s| s.data().cloned())
    }

    /// Last terminal failure
    #[must_use]
    pub fn error(&self) -> Option<E>
    where
        E: Clone,
    {
        self.state(|s| s.error().cloned())
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl<R, D, E, X> Inner<R, D, E, X> {
    fn lock_state(&self) -> MutexGuard<'_, FetchState<D, E, X>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, D, E, X> Inner<R, D, E, X>
where
    R: Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
    X: FetchExtension<R> + Clone,
{
    /// Copy of the state for hook dispatch, skipped when no hook is set.
    fn snapshot(
        hooks: &Hooks<D, E, X>,
        state: &FetchState<D, E, X>,
    ) -> Option<FetchState<D, E, X>> {
        (!hooks.is_empty()).then(|| state.clone())
    }

    /// Gate, then the first Pending transition. `None` if the gate is closed.
    fn enter_chain(&self) -> Option<FetchPolicy> {
        let hooks = read(&self.hooks);

        let (policy, pending) = {
            let mut state = self.lock_state();
            if !(state.admits_overlap() && state.extension().permits()) {
                return None;
            }
            state.begin_chain();
            (*state.policy(), Self::snapshot(&hooks, &state))
        };

        FetchMetrics::record_attempt();
        tracing::debug!("Entering pending");

        if let Some(state) = pending {
            let dispatched = panic::catch_unwind(AssertUnwindSafe(|| hooks.pending(&state)));
            if let Err(payload) = dispatched {
                self.abort_chain(payload.as_ref());
                panic::resume_unwind(payload);
            }
        }

        Some(policy)
    }

    async fn run_chain(self: Arc<Self>, max_retry_times: usize) -> Result<D, FetchError<E>> {
        let started = Instant::now();
        let mut retries = 0;

        loop {
            let request = read(&self.request);
            let outcome = request().await;

            if let ControlFlow::Break(result) =
                self.settle_attempt(outcome, &mut retries, max_retry_times, started)
            {
                return result;
            }
        }
    }

    /// Apply one attempt's outcome to state, then dispatch its hooks.
    ///
    /// `Continue` means a retry has already re-entered Pending.
    fn settle_attempt(
        &self,
        outcome: Result<R, E>,
        retries: &mut usize,
        max_retry_times: usize,
        started: Instant,
    ) -> ControlFlow<Result<D, FetchError<E>>> {
        let hooks = read(&self.hooks);

        match outcome {
            Ok(response) => {
                let pipe = read(&self.pipe);
                let (data, settled) = {
                    let mut state = self.lock_state();
                    let data = pipe(&response, state.data());
                    state.succeed(data.clone());
                    state.extension_mut().on_success(&response);
                    (data, Self::snapshot(&hooks, &state))
                };

                if *retries > 0 {
                    tracing::info!(attempt = *retries, "Request succeeded after retry");
                }
                FetchMetrics::record_success(started.elapsed());

                if let Some(state) = settled {
                    hooks.success(&state, &data);
                }
                ControlFlow::Break(Ok(data))
            }
            Err(error) if *retries < max_retry_times => {
                *retries += 1;
                tracing::warn!(
                    attempt = *retries,
                    max_retry_times,
                    ?error,
                    "Request failed, retrying..."
                );
                FetchMetrics::record_retry();
                FetchMetrics::record_attempt();

                let pending = {
                    let mut state = self.lock_state();
                    state.begin_retry();
                    Self::snapshot(&hooks, &state)
                };

                if let Some(state) = pending {
                    hooks.pending(&state);
                }
                ControlFlow::Continue(())
            }
            Err(error) => {
                tracing::error!(
                    attempt = *retries,
                    ?error,
                    "Request failed after max retries"
                );
                FetchMetrics::record_failure(started.elapsed());

                let settled = {
                    let mut state = self.lock_state();
                    state.fail(error.clone());
                    state.extension_mut().on_failure();
                    Self::snapshot(&hooks, &state)
                };

                if let Some(state) = settled {
                    hooks.failure(&state, &error);
                }
                ControlFlow::Break(Err(FetchError::Request(error)))
            }
        }
    }

    /// Leave Pending after a panic in the request, the pipe or a hook.
    fn abort_chain(&self, payload: &(dyn Any + Send)) -> Interrupted {
        let reason = Interrupted::panicked(payload);
        tracing::error!(%reason, "Attempt chain panicked");
        FetchMetrics::record_panic();

        let mut state = self.lock_state();
        state.abort();
        state.extension_mut().on_failure();

        reason
    }

    fn report_timeout(&self, deadline: Duration) {
        FetchMetrics::record_timeout();
        tracing::warn!(timeout_ms = deadline.as_millis(), "Fetch timed out");

        let hooks = read(&self.hooks);
        let timed_out = Self::snapshot(&hooks, &self.lock_state());
        if let Some(state) = timed_out {
            hooks.timeout(&state);
        }
    }
}

impl<R, D, E, X> Clone for Fetcher<R, D, E, X> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, D, E, X> fmt::Debug for Fetcher<R, D, E, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Fetcher")
            .field("policy", state.policy())
            .field("fetching", &state.fetching())
            .field("fetched", &state.fetched())
            .field("hooks", &read(&self.inner.hooks))
            .finish_non_exhaustive()
    }
}

/// Builder for [`Fetcher`].
///
/// Created by [`Fetcher::builder`], [`Fetcher::piped`] or
/// [`ListFetcher::paginated`](crate::list_fetcher::ListFetcher).
pub struct FetcherBuilder<R, D, E, X = ()> {
    request: Request<R, E>,
    pipe: ResponsePipe<R, D>,
    policy: FetchPolicy,
    hooks: Hooks<D, E, X>,
    extension: X,
}

impl<R, D, E, X> FetcherBuilder<R, D, E, X> {
    /// Create a builder from already type-erased parts.
    #[must_use]
    pub fn new(request: Request<R, E>, pipe: ResponsePipe<R, D>, extension: X) -> Self {
        Self {
            request,
            pipe,
            policy: FetchPolicy::default(),
            hooks: Hooks::new(),
            extension,
        }
    }

    /// Replace the whole policy.
    #[must_use]
    pub const fn policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Allow or reject overlapping calls (default: allow).
    #[must_use]
    pub const fn concurrent(mut self, concurrent: bool) -> Self {
        self.policy.concurrent = concurrent;
        self
    }

    /// Deadline for each attempt chain (default: none).
    ///
    /// Rounded up to whole milliseconds; `Duration::ZERO` disables the deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.set_timeout(timeout);
        self
    }

    /// Retry budget after the first failed attempt (default: 0).
    #[must_use]
    pub const fn max_retry_times(mut self, max_retry_times: usize) -> Self {
        self.policy.max_retry_times = max_retry_times;
        self
    }

    /// Replace the whole hook set.
    #[must_use]
    pub fn hooks(mut self, hooks: Hooks<D, E, X>) -> Self {
        self.hooks = hooks;
        self
    }

    /// See [`Hooks::on_pending`].
    #[must_use]
    pub fn on_pending<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_pending(hook);
        self
    }

    /// See [`Hooks::on_success`].
    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, &D) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_success(hook);
        self
    }

    /// See [`Hooks::on_failure`].
    #[must_use]
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, &E) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_failure(hook);
        self
    }

    /// See [`Hooks::on_complete`].
    #[must_use]
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, Completion<'_, D, E>) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_complete(hook);
        self
    }

    /// See [`Hooks::on_change`].
    #[must_use]
    pub fn on_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>, Change<'_, D, E>) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_change(hook);
        self
    }

    /// See [`Hooks::on_timeout`].
    #[must_use]
    pub fn on_timeout<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FetchState<D, E, X>) + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_timeout(hook);
        self
    }

    /// Build the [`Fetcher`].
    #[must_use]
    pub fn build(self) -> Fetcher<R, D, E, X> {
        Fetcher {
            inner: Arc::new(Inner {
                request: RwLock::new(self.request),
                pipe: RwLock::new(self.pipe),
                hooks: RwLock::new(self.hooks),
                state: Mutex::new(FetchState::new(self.policy, self.extension)),
            }),
        }
    }
}

impl<R, D, E, X> fmt::Debug for FetcherBuilder<R, D, E, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherBuilder")
            .field("policy", &self.policy)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Box a request closure into the shared [`Request`] form.
pub(crate) fn erase_request<R, E, F, Fut>(request: F) -> Request<R, E>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    Arc::new(move || request().boxed())
}
