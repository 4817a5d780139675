//! Cancellable and deadline-bounded promises.
//!
//! A [`CancellablePromise`] settles exactly once, taking whichever of two
//! independent sources completes first:
//!
//! - the **executor** (a spawned future, or a [`Resolver`] handed to a closure)
//! - the **cancellation signal** ([`CancellablePromise::cancel`] or a [`CancelHandle`])
//!
//! A [`TimeoutPromise`] adds a one-shot timer that fires the cancellation
//! signal with [`Interrupted::TimedOut`] once its deadline elapses. The timer
//! is released on every settlement path: explicit [`TimeoutPromise::clear`],
//! settlement by either source, observation of the output, or drop.
//!
//! # Example
//!
//! ```rust
//! use composable_fetch_core::Interrupted;
//! use composable_fetch_runtime::promise::TimeoutPromise;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let promise = TimeoutPromise::new(
//!     async {
//!         tokio::time::sleep(Duration::from_millis(100)).await;
//!         Ok::<_, Interrupted>("resolved")
//!     },
//!     Duration::from_millis(20),
//! );
//!
//! let outcome = promise.await;
//! assert!(matches!(outcome, Err(Interrupted::TimedOut(_))));
//! # }
//! ```

use composable_fetch_core::Interrupted;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;

/// Internal: single-use completion shared by the executor and the
/// cancellation signal. The first `settle` wins; later calls are no-ops.
struct SettleOnce<T, E> {
    sender: Mutex<Option<oneshot::Sender<Result<T, E>>>>,
    settled: watch::Sender<bool>,
}

impl<T, E> SettleOnce<T, E> {
    fn new() -> (Arc<Self>, oneshot::Receiver<Result<T, E>>) {
        let (sender, receiver) = oneshot::channel();
        let (settled, _) = watch::channel(false);

        let slot = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            settled,
        });

        (slot, receiver)
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(sender) => {
                // The consumer may already be gone; the promise is settled either way.
                let _ = sender.send(outcome);
                self.settled.send_replace(true);
                true
            }
            None => false,
        }
    }

    fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.settled.subscribe()
    }
}

/// Settles a promise from inside its executor.
///
/// Handed to the closure given to [`CancellablePromise::with_executor`].
/// Clones share the same completion.
pub struct Resolver<T, E> {
    slot: Arc<SettleOnce<T, E>>,
}

impl<T, E> Resolver<T, E> {
    /// Resolve with a value. Returns `false` if the promise had already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.slot.settle(Ok(value))
    }

    /// Reject with a reason. Returns `false` if the promise had already settled.
    pub fn reject(&self, reason: E) -> bool {
        self.slot.settle(Err(reason))
    }

    /// Settle with a complete outcome.
    pub fn settle(&self, outcome: Result<T, E>) -> bool {
        self.slot.settle(outcome)
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.slot.is_settled())
            .finish()
    }
}

/// Detached handle that fires a promise's cancellation signal.
pub struct CancelHandle<T, E> {
    slot: Arc<SettleOnce<T, E>>,
}

impl<T, E> CancelHandle<T, E> {
    /// Cancel with the default reason. Returns `false` if already settled.
    pub fn cancel(&self) -> bool
    where
        E: From<Interrupted>,
    {
        self.cancel_with(E::from(Interrupted::cancelled()))
    }

    /// Cancel with a custom reason. Returns `false` if already settled.
    pub fn cancel_with(&self, reason: E) -> bool {
        let cancelled = self.slot.settle(Err(reason));
        if cancelled {
            tracing::debug!("Promise cancelled");
        }
        cancelled
    }

    /// Check if the promise has settled
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.slot.is_settled()
    }
}

impl<T, E> Clone for CancelHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> fmt::Debug for CancelHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("settled", &self.slot.is_settled())
            .finish()
    }
}

/// A promise whose outcome can be overridden by a cancellation signal.
///
/// Awaiting it yields `Result<T, E>`. The rejection type must be able to
/// represent an interruption (`E: From<Interrupted>`) so the default
/// cancellation reason can be produced.
///
/// Cancellation only affects this promise's own outcome: the executor keeps
/// running, and continuations built with [`then`](Self::then),
/// [`catch`](Self::catch) or [`finally`](Self::finally) are plain futures.
///
/// # Example
///
/// ```rust
/// use composable_fetch_core::Interrupted;
/// use composable_fetch_runtime::promise::CancellablePromise;
///
/// # async fn example() {
/// let promise = CancellablePromise::<&str, Interrupted>::with_executor(|_resolver| {
///     // never settles on its own
/// });
///
/// promise.cancel();
/// assert!(matches!(promise.await, Err(Interrupted::Cancelled(_))));
/// # }
/// ```
pub struct CancellablePromise<T, E> {
    slot: Arc<SettleOnce<T, E>>,
    receiver: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> CancellablePromise<T, E> {
    /// Create a promise from an executor closure.
    ///
    /// The closure runs immediately and receives a [`Resolver`]; it may
    /// settle synchronously or move the resolver into a task.
    pub fn with_executor<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let (slot, receiver) = SettleOnce::new();
        executor(Resolver {
            slot: Arc::clone(&slot),
        });

        Self { slot, receiver }
    }

    /// Create a promise that settles with the outcome of `future`.
    ///
    /// The future is spawned on the current Tokio runtime right away. If it
    /// panics, the promise rejects with [`Interrupted::Panicked`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<Interrupted> + Send + 'static,
    {
        Self::with_executor(|resolver| {
            tokio::spawn(async move {
                let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let reason = Interrupted::panicked(panic.as_ref());
                        tracing::error!(%reason, "Promise executor panicked");
                        Err(E::from(reason))
                    }
                };
                resolver.settle(outcome);
            });
        })
    }

    /// Fire the cancellation signal with the default reason.
    ///
    /// No-op if the promise has already settled.
    pub fn cancel(&self) -> &Self
    where
        E: From<Interrupted>,
    {
        self.cancel_with(E::from(Interrupted::cancelled()))
    }

    /// Fire the cancellation signal with a custom reason.
    ///
    /// No-op if the promise has already settled.
    pub fn cancel_with(&self, reason: E) -> &Self {
        if self.slot.settle(Err(reason)) {
            tracing::debug!("Promise cancelled");
        }
        self
    }

    /// Get a detached handle that can cancel this promise.
    #[must_use]
    pub fn canceller(&self) -> CancelHandle<T, E> {
        CancelHandle {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Check if the promise has settled (by either source)
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.slot.is_settled()
    }

    /// Continue with the settled outcome.
    pub fn then<U, F>(self, on_settled: F) -> impl Future<Output = U>
    where
        F: FnOnce(Result<T, E>) -> U,
        E: From<Interrupted>,
    {
        async move { on_settled(self.await) }
    }

    /// Recover a rejection into a value.
    pub fn catch<F>(self, on_rejected: F) -> impl Future<Output = T>
    where
        F: FnOnce(E) -> T,
        E: From<Interrupted>,
    {
        async move { self.await.unwrap_or_else(on_rejected) }
    }

    /// Run `on_finally` after settlement, passing the outcome through.
    pub fn finally<F>(self, on_finally: F) -> impl Future<Output = Result<T, E>>
    where
        F: FnOnce(),
        E: From<Interrupted>,
    {
        async move {
            let outcome = self.await;
            on_finally();
            outcome
        }
    }
}

impl<T, E> Future for CancellablePromise<T, E>
where
    E: From<Interrupted>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The sender lives in `slot`, which we hold, so it can only vanish
            // after sending. Treat the impossible case as a cancellation.
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(Interrupted::cancelled()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> fmt::Debug for CancellablePromise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellablePromise")
            .field("settled", &self.slot.is_settled())
            .finish_non_exhaustive()
    }
}

/// Internal: RAII owner of a deadline timer task.
///
/// Disarming aborts the task. Dropping the guard disarms it.
struct TimerGuard {
    task: Mutex<Option<AbortHandle>>,
}

impl TimerGuard {
    const fn disarmed() -> Self {
        Self {
            task: Mutex::new(None),
        }
    }

    fn arm<T, E>(slot: &Arc<SettleOnce<T, E>>, deadline: Duration) -> Self
    where
        T: Send + 'static,
        E: From<Interrupted> + Send + 'static,
    {
        let canceller = CancelHandle {
            slot: Arc::clone(slot),
        };
        let mut settled = slot.subscribe();

        let task = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(deadline) => {
                    if canceller.cancel_with(E::from(Interrupted::timed_out(deadline))) {
                        tracing::warn!(
                            timeout_ms = deadline.as_millis(),
                            "Deadline elapsed before settlement"
                        );
                    }
                }
                _ = settled.wait_for(|done| *done) => {
                    tracing::trace!("Settled before deadline, releasing timer");
                }
            }
        });

        Self {
            task: Mutex::new(Some(task.abort_handle())),
        }
    }

    fn disarm(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn is_armed(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// A [`CancellablePromise`] with a deadline.
///
/// With a non-zero `timeout`, a timer fires the cancellation signal with
/// [`Interrupted::TimedOut`] once the deadline elapses. With
/// `Duration::ZERO` no timer is armed and the promise behaves exactly like a
/// plain [`CancellablePromise`].
pub struct TimeoutPromise<T, E> {
    promise: CancellablePromise<T, E>,
    timeout: Duration,
    timer: TimerGuard,
}

impl<T, E> TimeoutPromise<T, E>
where
    T: Send + 'static,
    E: From<Interrupted> + Send + 'static,
{
    /// Create a deadline-bounded promise from a future.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new<F>(future: F, timeout: Duration) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::arm(CancellablePromise::new(future), timeout)
    }

    /// Create a deadline-bounded promise from an executor closure.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` is non-zero and this is called outside of a Tokio runtime.
    pub fn with_executor<F>(executor: F, timeout: Duration) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        Self::arm(CancellablePromise::with_executor(executor), timeout)
    }

    fn arm(promise: CancellablePromise<T, E>, timeout: Duration) -> Self {
        let timer = if timeout.is_zero() {
            TimerGuard::disarmed()
        } else {
            TimerGuard::arm(&promise.slot, timeout)
        };

        Self {
            promise,
            timeout,
            timer,
        }
    }
}

impl<T, E> TimeoutPromise<T, E> {
    /// Fire the cancellation signal with the default reason.
    pub fn cancel(&self) -> &Self
    where
        E: From<Interrupted>,
    {
        self.promise.cancel();
        self
    }

    /// Fire the cancellation signal with a custom reason.
    pub fn cancel_with(&self, reason: E) -> &Self {
        self.promise.cancel_with(reason);
        self
    }

    /// Disarm the deadline timer.
    ///
    /// Safe to call repeatedly, or after the timer has fired.
    pub fn clear(&self) -> &Self {
        if self.timer.disarm() {
            tracing::trace!("Deadline timer cleared");
        }
        self
    }

    /// Check if the deadline timer is still pending
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Check if the promise has settled
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.promise.is_settled()
    }

    /// Configured deadline (`Duration::ZERO` when none)
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get a detached handle that can cancel this promise.
    #[must_use]
    pub fn canceller(&self) -> CancelHandle<T, E> {
        self.promise.canceller()
    }

    /// Continue with the settled outcome.
    pub fn then<U, F>(self, on_settled: F) -> impl Future<Output = U>
    where
        F: FnOnce(Result<T, E>) -> U,
        E: From<Interrupted>,
    {
        async move { on_settled(self.await) }
    }

    /// Recover a rejection into a value.
    pub fn catch<F>(self, on_rejected: F) -> impl Future<Output = T>
    where
        F: FnOnce(E) -> T,
        E: From<Interrupted>,
    {
        async move { self.await.unwrap_or_else(on_rejected) }
    }

    /// Run `on_finally` after settlement. The timer is cleared first.
    pub fn finally<F>(mut self, on_finally: F) -> impl Future<Output = Result<T, E>>
    where
        F: FnOnce(),
        E: From<Interrupted>,
    {
        async move {
            let outcome = (&mut self.promise).await;
            self.clear();
            on_finally();
            outcome
        }
    }
}

impl<T, E> Future for TimeoutPromise<T, E>
where
    E: From<Interrupted>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = Pin::new(&mut self.promise).poll(cx);
        if outcome.is_ready() {
            self.timer.disarm();
        }
        outcome
    }
}

impl<T, E> fmt::Debug for TimeoutPromise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutPromise")
            .field("timeout", &self.timeout)
            .field("armed", &self.timer.is_armed())
            .field("settled", &self.promise.is_settled())
            .finish()
    }
}
