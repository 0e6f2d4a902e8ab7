//
//  bitbucket-cli
//  api/common/pagination.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Pagination Types for Bitbucket Cloud Responses
//!
//! Bitbucket Cloud list endpoints accept `page` and `pagelen` query
//! parameters and answer with an envelope carrying `size`, `page`,
//! `pagelen`, `next`, `previous` and `values`. The `next` URL is the cursor:
//! when it is absent the traversal is over.
//!
//! - [`PaginatedResponse`]: the raw envelope as returned by the API
//! - [`PageOptions`]: where a traversal starts and how far it may go
//! - [`Page`]: one page handed out by the [`Paginator`](crate::api::Paginator)

use serde::{Deserialize, Serialize};

use super::error::{BitbucketError, Result};

/// Largest `pagelen` Bitbucket Cloud accepts.
pub const MAX_PAGE_LEN: u32 = 100;

/// Default `pagelen` when none is requested.
pub const DEFAULT_PAGE_LEN: u32 = 10;

/// Paginated response envelope from Bitbucket Cloud API.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::api::common::PaginatedResponse;
///
/// let json = r#"{
///     "values": [{"slug": "repo1"}],
///     "page": 1,
///     "pagelen": 10,
///     "size": 25,
///     "next": "https://api.bitbucket.org/2.0/repositories/ws?page=2"
/// }"#;
///
/// let response: PaginatedResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
/// assert!(response.has_next());
/// assert_eq!(response.values.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    /// Items in the current page.
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,

    /// Current page number (1-indexed).
    #[serde(default)]
    pub page: Option<u32>,

    /// Requested number of items per page.
    #[serde(default)]
    pub pagelen: Option<u32>,

    /// Total number of items across all pages, when the server reports it.
    #[serde(default)]
    pub size: Option<u32>,

    /// Absolute URL of the next page.
    #[serde(default)]
    pub next: Option<String>,

    /// Absolute URL of the previous page.
    #[serde(default)]
    pub previous: Option<String>,
}

impl<T> PaginatedResponse<T> {
    pub fn has_next(&self) -> bool {
        self.next.as_deref().is_some_and(|n| !n.is_empty())
    }

    pub fn next_url(&self) -> Option<&str> {
        self.next.as_deref().filter(|n| !n.is_empty())
    }
}

/// Where a traversal starts, its page size, and an optional cap on items.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::api::PageOptions;
///
/// let options = PageOptions::new().page_len(50).limit(120);
/// assert_eq!(options.page, 1);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    /// First page to request (1-indexed).
    pub page: u32,

    /// Items per page.
    pub page_len: u32,

    /// Upper bound on items returned across all pages.
    pub limit: Option<usize>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            page: 1,
            page_len: DEFAULT_PAGE_LEN,
            limit: None,
        }
    }
}

impl PageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn page_len(mut self, page_len: u32) -> Self {
        self.page_len = page_len;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Rejects options that cannot produce a valid first request.
    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(BitbucketError::validation("page must be at least 1"));
        }
        if self.page_len == 0 {
            return Err(BitbucketError::validation("pagelen must be at least 1"));
        }
        if self.page_len > MAX_PAGE_LEN {
            return Err(BitbucketError::validation(format!(
                "pagelen must not exceed {MAX_PAGE_LEN}"
            )));
        }
        Ok(())
    }
}

/// One page of a traversal.
///
/// `size` is the number of records in `values`. It never exceeds `page_len`
/// except when the server ignores the requested page length; when a
/// traversal limit falls inside a page, `values` is truncated to the
/// remaining count.
#[derive(Debug, Clone)]
pub struct Page<T = serde_json::Value> {
    /// Number of records in this page.
    pub size: usize,

    /// Page number as reported by the server (or as requested).
    pub page: u32,

    /// Page length as reported by the server (or as requested).
    pub page_len: u32,

    /// Total item count reported by the server, if any.
    pub total_size: Option<u32>,

    /// Whether the traversal can produce another page.
    pub has_next: bool,

    /// Records in server order.
    pub values: Vec<T>,
}
