//! Lifecycle statuses and the payloads handed to `on_change` / `on_complete`.

use std::fmt;

/// Lifecycle status reported through `on_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// An attempt has started
    Pending,
    /// The attempt chain produced a response
    Success,
    /// The attempt chain failed and no retries remain
    Failure,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Payload of an `on_change` call: the new status and, for terminal
/// statuses, the value that produced it.
#[derive(Debug, PartialEq, Eq)]
pub enum Change<'a, D, E> {
    /// Entered Pending (one per attempt, retries included)
    Pending,
    /// Settled successfully with the piped data
    Success(&'a D),
    /// Settled with the final request error
    Failure(&'a E),
}

impl<D, E> Change<'_, D, E> {
    /// Status carried by this change.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Pending => Status::Pending,
            Self::Success(_) => Status::Success,
            Self::Failure(_) => Status::Failure,
        }
    }
}

/// Payload of an `on_complete` call.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion<'a, D, E> {
    /// The chain succeeded with the piped data
    Ok(&'a D),
    /// The chain failed with the final request error
    Err(&'a E),
}

impl<'a, D, E> Completion<'a, D, E> {
    /// `true` for a successful completion.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// View as a `Result` of references.
    ///
    /// # Errors
    ///
    /// Returns the request error for a failed completion.
    pub const fn as_result(&self) -> Result<&'a D, &'a E> {
        match *self {
            Self::Ok(data) => Ok(data),
            Self::Err(error) => Err(error),
        }
    }
}
