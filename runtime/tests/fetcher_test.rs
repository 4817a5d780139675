//! Integration tests for the Fetcher lifecycle
//!
//! Covers retries, the concurrency gate, the deadline race, the response pipe,
//! hook ordering, panic recovery and reassignment through the public API only.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_fetch_runtime::{
    Completion, FetchError, FetchPolicy, Fetcher, Hooks, Interrupted, Status,
};
use composable_fetch_testing::{init_test_tracing, properties, CallCounter, MockRequest, StatusLog};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_always_failing_request_exhausts_retries() {
    init_test_tracing();

    let mock = MockRequest::failing();
    let pending = CallCounter::new();
    let failures = CallCounter::new();
    let completions = CallCounter::new();

    let fetcher = Fetcher::builder(mock.request())
        .max_retry_times(3)
        .on_pending({
            let pending = pending.clone();
            move |_| pending.increment()
        })
        .on_failure({
            let failures = failures.clone();
            move |_, _| failures.increment()
        })
        .on_complete({
            let completions = completions.clone();
            move |_, completion| {
                assert!(!completion.is_ok());
                completions.increment();
            }
        })
        .build();

    let outcome = fetcher.fetch().await;

    assert_eq!(outcome, Err(FetchError::Request("request 4 failed".to_string())));
    assert_eq!(pending.get(), 4);
    assert_eq!(failures.get(), 1);
    assert_eq!(completions.get(), 1);
    assert_eq!(mock.calls(), 4);
    assert_eq!(fetcher.retry_times(), 3);
    assert_eq!(fetcher.error(), Some("request 4 failed".to_string()));
    assert!(!fetcher.fetching());
    assert!(!fetcher.fetched());
}

#[tokio::test]
async fn test_request_recovers_within_retry_budget() {
    let mock = MockRequest::failing_first(2, "ok");
    let successes = CallCounter::new();
    let failures = CallCounter::new();

    let fetcher = Fetcher::builder(mock.request())
        .max_retry_times(3)
        .on_success({
            let successes = successes.clone();
            move |_, _| successes.increment()
        })
        .on_failure({
            let failures = failures.clone();
            move |_, _| failures.increment()
        })
        .build();

    assert_eq!(fetcher.fetch().await, Ok("ok".to_string()));
    assert_eq!(successes.get(), 1);
    assert_eq!(failures.get(), 0);
    assert_eq!(fetcher.retry_times(), 2);
    assert_eq!(fetcher.error(), None);
}

#[tokio::test]
async fn test_retry_budget_resets_per_fetch() {
    let mock = MockRequest::failing_first(1, "ok");
    let fetcher = Fetcher::builder(mock.request()).max_retry_times(1).build();

    fetcher.fetch().await.unwrap();
    assert_eq!(fetcher.retry_times(), 1);

    fetcher.fetch().await.unwrap();
    assert_eq!(fetcher.retry_times(), 0);
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn test_change_fires_once_per_pending_and_once_per_settlement() {
    let log = StatusLog::new();
    let mock = MockRequest::failing_first(2, "ok");

    let fetcher = Fetcher::builder(mock.request())
        .max_retry_times(5)
        .on_change({
            let log = log.clone();
            move |_, change| log.push(change.status())
        })
        .build();

    fetcher.fetch().await.unwrap();

    assert_eq!(
        log.snapshot(),
        vec![Status::Pending, Status::Pending, Status::Pending, Status::Success]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_pending_fires_once_per_attempt(max_retry_times in properties::retry_budget()) {
        let mock = MockRequest::failing();
        let pending = CallCounter::new();

        let fetcher = Fetcher::builder(mock.request())
            .max_retry_times(max_retry_times)
            .on_pending({
                let pending = pending.clone();
                move |_| pending.increment()
            })
            .build();

        let outcome = tokio_test::block_on(async { fetcher.fetch().await });

        prop_assert!(outcome.unwrap_err().request_error().is_some());
        prop_assert_eq!(pending.get(), max_retry_times + 1);
        prop_assert_eq!(mock.calls(), max_retry_times + 1);
    }

    #[test]
    fn prop_failures_within_budget_still_succeed(
        max_retry_times in properties::retry_budget(),
        failures in 0usize..6,
    ) {
        let mock = MockRequest::failing_first(failures, "ok");
        let fetcher = Fetcher::builder(mock.request())
            .max_retry_times(max_retry_times)
            .build();

        let outcome = tokio_test::block_on(async { fetcher.fetch().await });

        if failures <= max_retry_times {
            prop_assert_eq!(outcome, Ok("ok".to_string()));
            prop_assert_eq!(fetcher.retry_times(), failures);
        } else {
            prop_assert!(outcome.is_err());
            prop_assert_eq!(mock.calls(), max_retry_times + 1);
        }
    }
}

// ============================================================================
// Concurrency gate
// ============================================================================

#[tokio::test]
async fn test_non_concurrent_fetcher_blocks_overlapping_call() {
    let mock = MockRequest::succeeding("ok").with_delay(Duration::from_millis(50));
    let pending = CallCounter::new();
    let changes = CallCounter::new();

    let fetcher = Fetcher::builder(mock.request())
        .concurrent(false)
        .on_pending({
            let pending = pending.clone();
            move |_| pending.increment()
        })
        .on_change({
            let changes = changes.clone();
            move |_, _| changes.increment()
        })
        .build();

    let first = fetcher.fetch();
    let second = fetcher.fetch();

    let blocked = second.await;
    assert_eq!(blocked, Err(FetchError::Blocked));
    assert!(blocked.unwrap_err().is_blocked());
    assert_eq!(pending.get(), 1);
    assert_eq!(changes.get(), 1);
    assert!(fetcher.fetching());

    assert_eq!(first.await, Ok("ok".to_string()));
    assert_eq!(mock.calls(), 1);

    // Gate reopens once the chain settles
    assert!(fetcher.fetch().await.is_ok());
}

#[tokio::test]
async fn test_concurrent_fetcher_runs_overlapping_calls() {
    let mock = MockRequest::succeeding("ok").with_delay(Duration::from_millis(20));
    let pending = CallCounter::new();

    let fetcher = Fetcher::builder(mock.request())
        .concurrent(true)
        .on_pending({
            let pending = pending.clone();
            move |_| pending.increment()
        })
        .build();

    let (first, second) = tokio::join!(fetcher.fetch(), fetcher.fetch());

    assert_eq!(first, Ok("ok".to_string()));
    assert_eq!(second, Ok("ok".to_string()));
    assert_eq!(pending.get(), 2);
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_blocked_call_leaves_state_untouched() {
    let mock = MockRequest::succeeding("ok").with_delay(Duration::from_millis(30));
    let fetcher = Fetcher::builder(mock.request()).concurrent(false).build();

    let first = fetcher.fetch();
    let before = fetcher.state(|s| (s.fetching(), s.fetched(), s.retry_times()));

    assert!(fetcher.fetch().await.is_err());
    let after = fetcher.state(|s| (s.fetching(), s.fetched(), s.retry_times()));

    assert_eq!(before, after);
    first.await.unwrap();
}

#[tokio::test]
async fn test_policy_loaded_from_json() {
    let policy: FetchPolicy = serde_json::from_str(r#"{"concurrent": false}"#).unwrap();
    let mock = MockRequest::succeeding("ok").with_delay(Duration::from_millis(20));
    let fetcher = Fetcher::builder(mock.request()).policy(policy).build();

    let first = fetcher.fetch();
    assert_eq!(fetcher.fetch().await, Err(FetchError::Blocked));
    first.await.unwrap();
}

// ============================================================================
// Deadline
// ============================================================================

#[tokio::test]
async fn test_slow_request_times_out() {
    let mock = MockRequest::succeeding("late").with_delay(Duration::from_millis(200));
    let timeouts = CallCounter::new();
    let successes = CallCounter::new();

    let fetcher = Fetcher::builder(mock.request())
        .timeout(Duration::from_millis(20))
        .on_timeout({
            let timeouts = timeouts.clone();
            move |state| {
                assert!(state.fetching());
                timeouts.increment();
            }
        })
        .on_success({
            let successes = successes.clone();
            move |_, _| successes.increment()
        })
        .build();

    let error = fetcher.fetch().await.unwrap_err();

    assert!(error.is_timeout());
    assert!(!error.is_cancelled());
    assert_eq!(timeouts.get(), 1);
    assert_eq!(successes.get(), 0);

    // The chain is not aborted: it settles later and still drives state
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(timeouts.get(), 1);
    assert_eq!(successes.get(), 1);
    assert!(fetcher.fetched());
    assert_eq!(fetcher.data(), Some("late".to_string()));
}

#[tokio::test]
async fn test_fast_request_never_times_out() {
    let mock = MockRequest::succeeding("fast");
    let timeouts = CallCounter::new();

    let fetcher = Fetcher::builder(mock.request())
        .timeout(Duration::from_millis(500))
        .on_timeout({
            let timeouts = timeouts.clone();
            move |_| timeouts.increment()
        })
        .build();

    assert_eq!(fetcher.fetch().await, Ok("fast".to_string()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(timeouts.get(), 0);
}

#[tokio::test]
async fn test_deadline_covers_all_retries() {
    // Each attempt fits the deadline, the chain of four does not
    let mock = MockRequest::failing().with_delay(Duration::from_millis(30));

    let fetcher = Fetcher::builder(mock.request())
        .max_retry_times(3)
        .timeout(Duration::from_millis(70))
        .build();

    let error = fetcher.fetch().await.unwrap_err();

    assert!(error.is_timeout());
    assert!(mock.calls() < 4);
}

#[tokio::test]
async fn test_sub_millisecond_timeout_still_applies() {
    let mock = MockRequest::succeeding("late").with_delay(Duration::from_millis(50));

    let fetcher = Fetcher::builder(mock.request())
        .timeout(Duration::from_micros(500))
        .build();

    assert_eq!(fetcher.policy().timeout_ms, 1);
    assert_eq!(fetcher.policy().deadline(), Some(Duration::from_millis(1)));

    let error = fetcher.fetch().await.unwrap_err();
    assert!(error.is_timeout());
}

// ============================================================================
// Response pipe and hook ordering
// ============================================================================

#[tokio::test]
async fn test_pipe_applied_once_per_success() {
    let mock = MockRequest::succeeding("four");
    let pipe_calls = Arc::new(AtomicUsize::new(0));

    let fetcher = Fetcher::piped(mock.request(), {
        let pipe_calls = Arc::clone(&pipe_calls);
        move |raw: &String, previous: Option<&usize>| {
            pipe_calls.fetch_add(1, Ordering::SeqCst);
            previous.copied().unwrap_or(0) + raw.len()
        }
    })
    .build();

    assert_eq!(fetcher.fetch().await, Ok(4));
    assert_eq!(pipe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.data(), Some(4));

    // The pipe sees the previous piped value, never the raw one
    assert_eq!(fetcher.fetch().await, Ok(8));
    assert_eq!(pipe_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_hooks_observe_post_transition_state() {
    let mock = MockRequest::succeeding("ok");

    let fetcher = Fetcher::builder(mock.request())
        .on_pending(|state| {
            assert!(state.fetching());
        })
        .on_success(|state, data| {
            assert!(!state.fetching());
            assert!(state.fetched());
            assert_eq!(state.data(), Some(data));
        })
        .on_complete(|state, completion| {
            assert_eq!(completion.as_result().ok(), state.data());
        })
        .build();

    fetcher.fetch().await.unwrap();

    let failing = Fetcher::builder(MockRequest::failing().request())
        .on_failure(|state, error| {
            assert!(!state.fetching());
            assert_eq!(state.error(), Some(error));
        })
        .build();

    failing.fetch().await.unwrap_err();
}

#[tokio::test]
async fn test_success_dispatch_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mock = MockRequest::succeeding("ok");

    let fetcher = Fetcher::builder(mock.request())
        .on_pending({
            let order = Arc::clone(&order);
            move |_| order.lock().unwrap().push("pending")
        })
        .on_success({
            let order = Arc::clone(&order);
            move |_, _| order.lock().unwrap().push("success")
        })
        .on_change({
            let order = Arc::clone(&order);
            move |_, change| order.lock().unwrap().push(match change.status() {
                Status::Pending => "change:pending",
                Status::Success => "change:success",
                Status::Failure => "change:failure",
            })
        })
        .on_complete({
            let order = Arc::clone(&order);
            move |_, completion| {
                assert!(matches!(completion, Completion::Ok(_)));
                order.lock().unwrap().push("complete");
            }
        })
        .build();

    fetcher.fetch().await.unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec![
            "pending",
            "change:pending",
            "success",
            "change:success",
            "complete"
        ]
    );
}

#[tokio::test]
async fn test_refetch_keeps_last_data_after_failure() {
    let calls = Arc::new(AtomicUsize::new(0));

    let fetcher = Fetcher::builder({
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Ok(10)
                } else {
                    Err("down".to_string())
                }
            }
        }
    })
    .build();

    assert_eq!(fetcher.fetch().await, Ok(10));
    assert!(fetcher.fetch().await.is_err());

    assert!(fetcher.fetched());
    assert_eq!(fetcher.data(), Some(10));
    assert_eq!(fetcher.error(), Some("down".to_string()));
}

#[tokio::test]
async fn test_hooks_can_read_their_own_fetcher() {
    let handle: Arc<OnceLock<Fetcher<String, String, String>>> = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let fetcher = Fetcher::builder(MockRequest::succeeding("ok").request())
        .on_pending({
            let handle = Arc::clone(&handle);
            move |_| assert!(handle.get().unwrap().fetching())
        })
        .on_success({
            let handle = Arc::clone(&handle);
            let seen = Arc::clone(&seen);
            move |_, _| {
                let fetcher = handle.get().unwrap();
                seen.lock().unwrap().push((fetcher.fetching(), fetcher.data()));
            }
        })
        .build();
    handle.set(fetcher.clone()).unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(500), fetcher.fetch())
        .await
        .expect("hook reading the fetcher must not deadlock");

    assert_eq!(outcome, Ok("ok".to_string()));
    assert_eq!(*seen.lock().unwrap(), vec![(false, Some("ok".to_string()))]);
}

// ============================================================================
// Panics
// ============================================================================

async fn explode() -> Result<String, String> {
    panic!("request exploded")
}

#[tokio::test]
async fn test_panicking_request_settles_and_reopens_gate() {
    let failures = CallCounter::new();

    let fetcher = Fetcher::builder(explode)
        .concurrent(false)
        .on_failure({
            let failures = failures.clone();
            move |_, _| failures.increment()
        })
        .build();

    let outcome = tokio::time::timeout(Duration::from_millis(300), fetcher.fetch())
        .await
        .expect("a panicking request must still settle the fetch");

    let error = outcome.unwrap_err();
    assert!(error.is_panic());
    assert_eq!(
        error,
        FetchError::Interrupted(Interrupted::Panicked("request exploded".to_string()))
    );
    assert!(!fetcher.fetching());
    assert!(!fetcher.fetched());
    assert_eq!(failures.get(), 0);

    // Not Blocked: the gate reopened, and the replaced request is used
    let mock = MockRequest::succeeding("recovered");
    fetcher.set_request(mock.request());
    assert_eq!(fetcher.fetch().await, Ok("recovered".to_string()));
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_panicking_success_hook_keeps_data() {
    let fetcher = Fetcher::builder(MockRequest::succeeding("ok").request())
        .concurrent(false)
        .on_success(|_, _| panic!("hook exploded"))
        .build();

    let error = fetcher.fetch().await.unwrap_err();

    assert!(error.is_panic());
    assert!(!fetcher.fetching());
    assert!(fetcher.fetched());
    assert_eq!(fetcher.data(), Some("ok".to_string()));
}

#[tokio::test]
async fn test_panicking_pending_hook_reopens_gate() {
    let fetcher = Fetcher::builder(MockRequest::succeeding("ok").request())
        .concurrent(false)
        .on_pending(|_| panic!("pending exploded"))
        .build();

    let raised = panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch()));

    assert!(raised.is_err());
    assert!(!fetcher.fetching());

    fetcher.set_hooks(Hooks::new());
    assert_eq!(fetcher.fetch().await, Ok("ok".to_string()));
}

// ============================================================================
// Reassignment
// ============================================================================

#[tokio::test]
async fn test_set_request_applies_to_next_fetch() {
    let replacement = MockRequest::succeeding("second");
    let fetcher = Fetcher::builder(MockRequest::failing().request())
        .max_retry_times(1)
        .build();

    fetcher.set_request(replacement.request());

    assert_eq!(fetcher.fetch().await, Ok("second".to_string()));
    assert_eq!(fetcher.retry_times(), 0);
    assert_eq!(replacement.calls(), 1);
}

#[tokio::test]
async fn test_set_pipe_applies_to_next_success() {
    let fetcher = Fetcher::piped(
        MockRequest::succeeding("abc").request(),
        |raw: &String, _: Option<&usize>| raw.len(),
    )
    .build();

    assert_eq!(fetcher.fetch().await, Ok(3));

    fetcher.set_pipe(|raw: &String, previous: Option<&usize>| {
        previous.copied().unwrap_or(0) * 10 + raw.len()
    });
    assert_eq!(fetcher.fetch().await, Ok(33));
    assert_eq!(fetcher.data(), Some(33));
}

#[tokio::test]
async fn test_set_hooks_replaces_every_hook() {
    let old = CallCounter::new();
    let new = StatusLog::new();

    let fetcher = Fetcher::builder(MockRequest::succeeding("ok").request())
        .on_pending({
            let old = old.clone();
            move |_| old.increment()
        })
        .build();

    fetcher.fetch().await.unwrap();
    assert_eq!(old.get(), 1);

    fetcher.set_hooks(Hooks::new().on_change({
        let new = new.clone();
        move |_, change| new.push(change.status())
    }));
    fetcher.fetch().await.unwrap();

    assert_eq!(old.get(), 1);
    assert_eq!(new.snapshot(), vec![Status::Pending, Status::Success]);
}
