//
//  bitbucket-cli
//  api/paginator.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Paginator
//!
//! Lazily walks a Bitbucket Cloud list endpoint one page at a time.
//!
//! The first request carries `page` and `pagelen` from [`PageOptions`];
//! every later request follows the server's `next` link verbatim. The
//! traversal ends when the server stops sending `next`, a page comes back
//! empty, or the optional item limit is reached (the last page is then
//! truncated to exactly the remaining count).
//!
//! A paginator is a single traversal: `next_page` takes `&mut self`, so
//! concurrent use of one instance does not compile. Create one per
//! traversal instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bitbucket_client::api::{BitbucketClient, PageOptions, RequestContext};
//!
//! # async fn example(client: BitbucketClient) -> bitbucket_client::api::Result<()> {
//! let ctx = RequestContext::background();
//! let mut pages = client.paginate::<serde_json::Value>(
//!     "/repositories/myworkspace",
//!     PageOptions::new().page_len(50).limit(120),
//! )?;
//!
//! while pages.has_next_page() {
//!     if let Some(page) = pages.next_page(&ctx).await? {
//!         println!("page {} with {} repositories", page.page, page.size);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;

use super::common::{BitbucketError, Page, PageOptions, PaginatedResponse, Result};
use super::context::RequestContext;
use super::executor::HttpExecutor;

/// Stateful page-by-page traversal of a list endpoint.
#[derive(Debug)]
pub struct Paginator<T = serde_json::Value> {
    executor: Arc<HttpExecutor>,
    options: PageOptions,
    next_url: Option<String>,
    next_page_number: u32,
    fetched: usize,
    exhausted: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Paginator<T> {
    /// Prepares a traversal of `path`. Nothing is fetched yet.
    pub fn new(executor: Arc<HttpExecutor>, path: &str, options: PageOptions) -> Result<Self> {
        options.validate()?;
        if path.trim().is_empty() {
            return Err(BitbucketError::validation("list path must not be empty"));
        }

        let separator = if path.contains('?') { '&' } else { '?' };
        let first = format!(
            "{path}{separator}page={}&pagelen={}",
            options.page, options.page_len
        );

        Ok(Self {
            executor,
            options,
            next_url: Some(first),
            next_page_number: options.page,
            fetched: 0,
            exhausted: options.limit == Some(0),
            _marker: PhantomData,
        })
    }

    /// Whether another call to [`next_page`](Self::next_page) can return
    /// records.
    pub fn has_next_page(&self) -> bool {
        !self.exhausted && !self.limit_reached()
    }

    /// Records returned so far.
    pub fn items_fetched(&self) -> usize {
        self.fetched
    }

    fn limit_reached(&self) -> bool {
        self.options.limit.is_some_and(|limit| self.fetched >= limit)
    }

    /// Fetches the next page.
    ///
    /// Returns `Ok(None)` once the traversal is over, however many times it
    /// is called. A failed fetch leaves the position unchanged so the same
    /// page can be requested again.
    pub async fn next_page(&mut self, ctx: &RequestContext) -> Result<Option<Page<T>>> {
        if !self.has_next_page() {
            return Ok(None);
        }
        let Some(url) = self.next_url.clone() else {
            self.exhausted = true;
            return Ok(None);
        };

        let response = self.executor.execute(ctx, Method::GET, &url, None).await?;
        let envelope: PaginatedResponse<T> = response.json()?;

        let next_url = envelope.next_url().map(String::from);
        let mut values = envelope.values;
        if let Some(limit) = self.options.limit {
            values.truncate(limit.saturating_sub(self.fetched));
        }

        self.fetched += values.len();
        self.exhausted = values.is_empty() || next_url.is_none();
        self.next_url = next_url;

        let page_number = envelope.page.unwrap_or(self.next_page_number);
        self.next_page_number = page_number.saturating_add(1);

        tracing::debug!(
            page = page_number,
            size = values.len(),
            fetched = self.fetched,
            exhausted = self.exhausted,
            "Fetched page"
        );

        Ok(Some(Page {
            size: values.len(),
            page: page_number,
            page_len: envelope.pagelen.unwrap_or(self.options.page_len),
            total_size: envelope.size,
            has_next: self.has_next_page(),
            values,
        }))
    }

    /// Drains the rest of the traversal into one vector.
    pub async fn collect_all(&mut self, ctx: &RequestContext) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while self.has_next_page() {
            match self.next_page(ctx).await? {
                Some(page) => items.extend(page.values),
                None => break,
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ErrorKind, RetryPolicy};
    use mockito::Matcher;
    use reqwest::Client;

    fn executor(base_url: &str) -> Arc<HttpExecutor> {
        Arc::new(HttpExecutor::new(Client::new(), base_url, None, RetryPolicy::no_retry()).unwrap())
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let executor = executor("http://127.0.0.1:9");
        let err = Paginator::<serde_json::Value>::new(
            executor.clone(),
            "/repositories/ws",
            PageOptions::new().page_len(0),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = Paginator::<serde_json::Value>::new(executor, " ", PageOptions::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_zero_limit_fetches_nothing() {
        let mut pages = Paginator::<serde_json::Value>::new(
            executor("http://127.0.0.1:9"),
            "/repositories/ws",
            PageOptions::new().limit(0),
        )
        .unwrap();

        assert!(!pages.has_next_page());
        assert!(pages
            .next_page(&RequestContext::background())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_existing_query_and_empty_page() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/repositories/ws/repo/pullrequests(\?|$)".into()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("state".into(), "OPEN".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("pagelen".into(), "10".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"values": [], "page": 1, "pagelen": 10, "size": 0}"#)
            .create_async()
            .await;

        let mut pages = Paginator::<serde_json::Value>::new(
            executor(&server.url()),
            "/repositories/ws/repo/pullrequests?state=OPEN",
            PageOptions::new(),
        )
        .unwrap();

        let page = pages
            .next_page(&RequestContext::background())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.size, 0);
        assert_eq!(page.total_size, Some(0));
        assert!(!page.has_next);
        assert!(!pages.has_next_page());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_fetch_can_be_retried() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/items(\?|$)".into()))
            .match_query(Matcher::UrlEncoded("pagelen".into(), "2".into()))
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/items(\?|$)".into()))
            .match_query(Matcher::UrlEncoded("pagelen".into(), "2".into()))
            .with_status(200)
            .with_body(r#"{"values": [1, 2], "page": 1, "pagelen": 2}"#)
            .create_async()
            .await;

        let ctx = RequestContext::background();
        let mut pages =
            Paginator::<u32>::new(executor(&server.url()), "/items", PageOptions::new().page_len(2))
                .unwrap();

        let err = pages.next_page(&ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Server);
        assert!(pages.has_next_page());

        assert_eq!(pages.collect_all(&ctx).await.unwrap(), vec![1, 2]);
        assert_eq!(pages.items_fetched(), 2);
    }
}
