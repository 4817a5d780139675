//! Error types for the fetch lifecycle.
//!
//! Rejections fall into three families:
//!
//! - **Gate block**: the call never started ([`FetchError::Blocked`])
//! - **Interruption**: the outcome was overridden by a cancellation, an
//!   elapsed deadline or a panic in the executor ([`Interrupted`])
//! - **Request failure**: the request's own error, surfaced verbatim once the
//!   retry budget is spent ([`FetchError::Request`])

use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Default message carried by a plain cancellation.
pub const DEFAULT_CANCELLATION_MESSAGE: &str = "operation cancelled";

/// Reason a cancellable promise was settled by its cancellation signal.
///
/// A timeout is a specialised cancellation: both travel through the same
/// race, but they remain distinguishable by variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Interrupted {
    /// Cancelled explicitly
    #[error("{0}")]
    Cancelled(String),

    /// Cancelled automatically because the deadline elapsed
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// The executor panicked before settling
    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl Interrupted {
    /// Plain cancellation with the default message.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::Cancelled(DEFAULT_CANCELLATION_MESSAGE.to_string())
    }

    /// Plain cancellation with a custom message.
    #[must_use]
    pub fn cancelled_with(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Timeout after the given deadline.
    #[must_use]
    pub const fn timed_out(deadline: Duration) -> Self {
        Self::TimedOut(deadline)
    }

    /// Panic in the executor, keeping the panic message when there is one.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }

    /// Check if this is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    /// Check if this is an explicit cancellation (not a timeout)
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Check if the executor panicked
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// Errors returned by a fetcher.
///
/// `E` is the request's own error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError<E> {
    /// The gate rejected the call before it started (overlap with
    /// `concurrent = false`, or an exhausted list)
    #[error("blocked by request gate")]
    Blocked,

    /// The outcome was cancelled, timed out, or the chain panicked
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// The request failed and no retries remain
    #[error("request failed: {0}")]
    Request(E),
}

impl<E> FetchError<E> {
    /// Check if the call was rejected by the gate
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked)
    }

    /// Check if the deadline elapsed
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Interrupted(Interrupted::TimedOut(_)))
    }

    /// Check if the outcome was cancelled explicitly
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Interrupted(Interrupted::Cancelled(_)))
    }

    /// Check if the request or a hook panicked
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Interrupted(Interrupted::Panicked(_)))
    }

    /// Borrow the request's own error, if that is what this is.
    #[must_use]
    pub const fn request_error(&self) -> Option<&E> {
        match self {
            Self::Request(error) => Some(error),
            _ => None,
        }
    }

    /// Take the request's own error, if that is what this is.
    #[must_use]
    pub fn into_request_error(self) -> Option<E> {
        match self {
            Self::Request(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interruption_kinds_are_distinct() {
        let cancelled = Interrupted::cancelled();
        let timed_out = Interrupted::timed_out(Duration::from_millis(20));

        assert!(cancelled.is_cancellation());
        assert!(!cancelled.is_timeout());
        assert!(timed_out.is_timeout());
        assert!(!timed_out.is_cancellation());
    }

    #[test]
    fn test_interruption_messages() {
        assert_eq!(Interrupted::cancelled().to_string(), DEFAULT_CANCELLATION_MESSAGE);
        assert_eq!(Interrupted::cancelled_with("user left").to_string(), "user left");
        assert_eq!(
            Interrupted::timed_out(Duration::from_millis(50)).to_string(),
            "timed out after 50ms"
        );
    }

    #[test]
    fn test_fetch_error_classification() {
        let blocked: FetchError<String> = FetchError::Blocked;
        let timeout: FetchError<String> = Interrupted::timed_out(Duration::from_millis(1)).into();
        let cancelled: FetchError<String> = Interrupted::cancelled().into();
        let failed = FetchError::Request("error".to_string());

        assert!(blocked.is_blocked());
        assert!(timeout.is_timeout() && !timeout.is_cancelled());
        assert!(cancelled.is_cancelled() && !cancelled.is_timeout());
        assert_eq!(failed.request_error().map(String::as_str), Some("error"));
        assert_eq!(blocked.request_error(), None);
    }

    #[test]
    fn test_panic_payload_becomes_message() {
        let from_str = Interrupted::panicked(&"boom");
        let from_string = Interrupted::panicked(&"lost connection".to_string());
        let opaque = Interrupted::panicked(&42_u8);

        assert_eq!(from_str, Interrupted::Panicked("boom".to_string()));
        assert_eq!(from_string.to_string(), "executor panicked: lost connection");
        assert!(opaque.is_panic() && !opaque.is_cancellation());

        let failed: FetchError<String> = from_str.into();
        assert!(failed.is_panic() && !failed.is_cancelled());
    }

    #[test]
    fn test_request_error_display_and_extraction() {
        let failed = FetchError::Request("boom".to_string());

        assert_eq!(failed.to_string(), "request failed: boom");
        assert_eq!(failed.into_request_error(), Some("boom".to_string()));
    }
}
