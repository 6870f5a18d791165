//! Page requests and paginated results.

use serde::{Deserialize, Serialize};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_PER_PAGE: u32 = 10;
const MAX_PER_PAGE: u32 = 100;

/// A normalized page request.
///
/// Pages are 1-based. Zero values fall back to the defaults and `per_page`
/// is capped at 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

impl PageRequest {
    /// Creates a page request, normalizing out-of-range values.
    pub fn new(page: u32, per_page: u32) -> Self {
        let page = if page == 0 { DEFAULT_PAGE } else { page };
        let per_page = match per_page {
            0 => DEFAULT_PER_PAGE,
            n if n > MAX_PER_PAGE => MAX_PER_PAGE,
            n => n,
        };
        Self { page, per_page }
    }

    /// Returns the 1-based page number.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Returns the number of items per page.
    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Returns the number of items to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_PER_PAGE)
    }
}

/// One page of results plus the total number of matching items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    /// Creates a page for the given request.
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page(),
            per_page: request.per_page(),
        }
    }

    /// Returns the total number of pages.
    pub fn total_pages(&self) -> u64 {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.per_page))
    }

    /// Maps every item, keeping the paging information.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}
