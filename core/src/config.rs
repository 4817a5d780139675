//! Fetch policy configuration.
//!
//! A [`FetchPolicy`] carries the settings that decide how a fetcher gates,
//! bounds and retries one attempt chain. It is plain data, so it can be
//! loaded from configuration files through `serde` and swapped on a live
//! fetcher.
//!
//! # Default Values
//!
//! - `concurrent`: `true` (overlapping calls are allowed)
//! - `timeout_ms`: `0` (no deadline)
//! - `max_retry_times`: `0` (no automatic retry)
//!
//! # Example
//!
//! ```
//! use composable_fetch_core::config::FetchPolicy;
//!
//! let policy: FetchPolicy = serde_json::from_str(r#"{ "max_retry_times": 2 }"#).unwrap();
//!
//! assert!(policy.concurrent);
//! assert_eq!(policy.max_retry_times, 2);
//! assert_eq!(policy.deadline(), None);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy for one fetcher: concurrency gate, deadline and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    /// Allow a new `fetch()` while a previous one is still in flight
    pub concurrent: bool,
    /// Deadline for a whole attempt chain in milliseconds (`0` disables it)
    pub timeout_ms: u64,
    /// Number of automatic retries after the first failed attempt
    pub max_retry_times: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            concurrent: true,
            timeout_ms: 0,
            max_retry_times: 0,
        }
    }
}

impl FetchPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> FetchPolicyBuilder {
        FetchPolicyBuilder {
            concurrent: None,
            timeout_ms: None,
            max_retry_times: None,
        }
    }

    /// Deadline for an attempt chain, `None` when no timer should be armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }

    /// Deadline as a [`Duration`], `Duration::ZERO` meaning "no deadline".
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Set the deadline from a [`Duration`].
    ///
    /// Rounded up to whole milliseconds, so a non-zero duration never
    /// becomes "no deadline". `Duration::ZERO` disables the deadline.
    pub const fn set_timeout(&mut self, timeout: Duration) {
        self.timeout_ms = millis_rounded_up(timeout);
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn millis_rounded_up(timeout: Duration) -> u64 {
    let millis = if timeout.subsec_nanos() % 1_000_000 == 0 {
        timeout.as_millis()
    } else {
        timeout.as_millis() + 1
    };

    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

/// Builder for [`FetchPolicy`].
#[derive(Debug, Clone)]
pub struct FetchPolicyBuilder {
    concurrent: Option<bool>,
    timeout_ms: Option<u64>,
    max_retry_times: Option<usize>,
}

impl FetchPolicyBuilder {
    /// Allow or reject overlapping calls.
    ///
    /// When `false`, a `fetch()` issued while another one is in flight is
    /// rejected before it starts.
    #[must_use]
    pub const fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = Some(concurrent);
        self
    }

    /// Set the deadline for an attempt chain.
    ///
    /// Rounded up to whole milliseconds; `Duration::ZERO` disables the deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(millis_rounded_up(timeout));
        self
    }

    /// Set the deadline in milliseconds.
    #[must_use]
    pub const fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn max_retry_times(mut self, max_retry_times: usize) -> Self {
        self.max_retry_times = Some(max_retry_times);
        self
    }

    /// Build the [`FetchPolicy`].
    #[must_use]
    pub fn build(self) -> FetchPolicy {
        let defaults = FetchPolicy::default();
        FetchPolicy {
            concurrent: self.concurrent.unwrap_or(defaults.concurrent),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
            max_retry_times: self.max_retry_times.unwrap_or(defaults.max_retry_times),
        }
    }
}
