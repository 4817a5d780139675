//! Paginated fetcher.
//!
//! A [`ListFetcher`] is a [`Fetcher`] whose extension is [`Pagination`]:
//!
//! - after each success, `page` advances and `has_more` is recomputed from
//!   the **raw** response with the caller's predicate
//! - once `has_more` is `false`, the gate stays closed and `fetch()` fails
//!   with [`FetchError::Blocked`](composable_fetch_core::FetchError::Blocked)
//!   without touching state
//!
//! How pages accumulate is up to the response pipe.
//!
//! # Example
//!
//! ```rust
//! use composable_fetch_runtime::ListFetcher;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! # async fn example() {
//! let cursor = Arc::new(AtomicU32::new(0));
//! let list = ListFetcher::paginated(
//!     move || {
//!         let cursor = Arc::clone(&cursor);
//!         async move { Ok::<_, String>(vec![cursor.fetch_add(1, Ordering::SeqCst)]) }
//!     },
//!     |page: &Vec<u32>, previous: Option<&Vec<u32>>| {
//!         let mut items = previous.cloned().unwrap_or_default();
//!         items.extend_from_slice(page);
//!         items
//!     },
//!     |page: &Vec<u32>| page.first().is_some_and(|n| *n < 2),
//! )
//! .build();
//!
//! while list.has_more() {
//!     list.fetch().await.unwrap();
//! }
//! assert_eq!(list.data(), Some(vec![0, 1, 2]));
//! assert_eq!(list.page(), 4);
//! # }
//! ```

use crate::fetcher::{erase_request, Fetcher, FetcherBuilder};
use composable_fetch_core::FetchExtension;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Fetcher with pagination bookkeeping.
pub type ListFetcher<R, D, E> = Fetcher<R, D, E, Pagination<R>>;

/// Pagination extension: current page and whether more pages exist.
pub struct Pagination<R> {
    page: usize,
    has_more: bool,
    is_there_more: Arc<dyn Fn(&R) -> bool + Send + Sync>,
}

impl<R> Pagination<R> {
    /// Start at page 1 with more pages assumed.
    pub fn new<P>(is_there_more: P) -> Self
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        Self {
            page: 1,
            has_more: true,
            is_there_more: Arc::new(is_there_more),
        }
    }

    /// Page the next successful fetch will load (starts at 1)
    #[must_use]
    pub const fn page(&self) -> usize {
        self.page
    }

    /// Whether the last response reported more pages
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.has_more
    }
}

impl<R: 'static> FetchExtension<R> for Pagination<R> {
    fn permits(&self) -> bool {
        self.has_more
    }

    fn on_success(&mut self, response: &R) {
        self.page += 1;
        self.has_more = (self.is_there_more)(response);
        tracing::debug!(page = self.page, has_more = self.has_more, "Advanced list page");
    }
}

impl<R> Clone for Pagination<R> {
    fn clone(&self) -> Self {
        Self {
            page: self.page,
            has_more: self.has_more,
            is_there_more: Arc::clone(&self.is_there_more),
        }
    }
}

impl<R> fmt::Debug for Pagination<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pagination")
            .field("page", &self.page)
            .field("has_more", &self.has_more)
            .finish_non_exhaustive()
    }
}

impl<R, D, E> Fetcher<R, D, E, Pagination<R>>
where
    R: Send + 'static,
    E: Send + 'static,
{
    /// Start building a list fetcher.
    ///
    /// - `request`: loads the next page
    /// - `pipe`: folds a raw page into the stored data (e.g. appends it)
    /// - `is_there_more`: inspects the raw page to decide if another exists
    pub fn paginated<F, Fut, P, M>(
        request: F,
        pipe: P,
        is_there_more: M,
    ) -> FetcherBuilder<R, D, E, Pagination<R>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        P: Fn(&R, Option<&D>) -> D + Send + Sync + 'static,
        M: Fn(&R) -> bool + Send + Sync + 'static,
    {
        FetcherBuilder::new(
            erase_request(request),
            Arc::new(pipe),
            Pagination::new(is_there_more),
        )
    }
}

impl<R, D, E> Fetcher<R, D, E, Pagination<R>> {
    /// Page the next successful fetch will load (starts at 1)
    #[must_use]
    pub fn page(&self) -> usize {
        self.state(|s| s.extension().page())
    }

    /// Whether another `fetch()` is allowed by pagination
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.state(|s| s.extension().has_more())
    }
}
