//
//  bitbucket-cli
//  tests/pagination_tests.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

use bitbucket_client::api::{BitbucketClient, PageOptions, RequestContext, RetryPolicy};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};

/// Serves 12 numbered items in pages of 5, linking pages with absolute
/// `next` URLs the way Bitbucket does.
async fn twelve_items() -> ServerGuard {
    let mut server = Server::new_async().await;
    let base = server.url();

    for page in 1..=3u32 {
        let start = (page - 1) * 5;
        let end = (start + 5).min(12);
        let values: Vec<u32> = (start..end).collect();
        let mut body = json!({
            "size": 12,
            "page": page,
            "pagelen": 5,
            "values": values,
        });
        if page < 3 {
            body["next"] = json!(format!("{base}/items?page={}&pagelen=5", page + 1));
        }

        server
            .mock("GET", Matcher::Regex(r"^/items(\?|$)".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), page.to_string()),
                Matcher::UrlEncoded("pagelen".into(), "5".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;
    }

    server
}

fn client(server: &ServerGuard) -> BitbucketClient {
    BitbucketClient::builder()
        .base_url(server.url())
        .retry_policy(RetryPolicy::no_retry())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_follows_next_links_to_the_end() {
    let server = twelve_items().await;
    let client = client(&server);
    let ctx = RequestContext::background();

    let mut pages = client
        .paginate::<u32>("/items", PageOptions::new().page_len(5))
        .unwrap();

    let mut sizes = Vec::new();
    let mut items = Vec::new();
    while let Some(page) = pages.next_page(&ctx).await.unwrap() {
        sizes.push(page.size);
        items.extend(page.values);
    }

    assert_eq!(sizes, vec![5, 5, 2]);
    assert_eq!(items, (0..12).collect::<Vec<_>>());
    assert!(!pages.has_next_page());
    assert!(pages.next_page(&ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn test_page_metadata() {
    let server = twelve_items().await;
    let client = client(&server);
    let ctx = RequestContext::background();

    let mut pages = client
        .paginate::<u32>("/items", PageOptions::new().page_len(5))
        .unwrap();

    let first = pages.next_page(&ctx).await.unwrap().unwrap();
    assert_eq!(first.page, 1);
    assert_eq!(first.page_len, 5);
    assert_eq!(first.total_size, Some(12));
    assert!(first.has_next);
    assert_eq!(pages.items_fetched(), 5);
}

#[tokio::test]
async fn test_limit_truncates_and_stops() {
    let server = twelve_items().await;
    let client = client(&server);
    let ctx = RequestContext::background();

    let mut pages = client
        .paginate::<u32>("/items", PageOptions::new().page_len(5).limit(7))
        .unwrap();

    let first = pages.next_page(&ctx).await.unwrap().unwrap();
    let second = pages.next_page(&ctx).await.unwrap().unwrap();
    assert_eq!(first.size, 5);
    assert_eq!(second.size, 2);
    assert_eq!(second.values, vec![5, 6]);
    assert!(!second.has_next);

    assert!(pages.next_page(&ctx).await.unwrap().is_none());
    assert!(pages.next_page(&ctx).await.unwrap().is_none());
    assert_eq!(pages.items_fetched(), 7);
}

#[tokio::test]
async fn test_collect_all() {
    let server = twelve_items().await;
    let client = client(&server);

    let mut pages = client
        .paginate::<Value>("/items", PageOptions::new().page_len(5))
        .unwrap();
    let all = pages
        .collect_all(&RequestContext::background())
        .await
        .unwrap();

    assert_eq!(all.len(), 12);
    assert_eq!(all[11], json!(11));
}

#[tokio::test]
async fn test_next_link_to_other_host_is_rejected() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/items(\?|$)".to_string()))
        .with_status(200)
        .with_body(
            json!({
                "values": [1],
                "next": "https://evil.example.com/items?page=2",
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = client(&server);
    let ctx = RequestContext::background();
    let mut pages = client
        .paginate::<u32>("/items", PageOptions::new())
        .unwrap();

    assert!(pages.next_page(&ctx).await.unwrap().is_some());
    let err = pages.next_page(&ctx).await.unwrap_err();
    assert_eq!(err.kind, bitbucket_client::api::ErrorKind::Validation);
}
