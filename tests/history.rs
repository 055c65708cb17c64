//! Integration tests for history traversal: completion strategies,
//! redirection handling, deduplication, and ordering.
//!
//! Each test runs against its own wiremock origin and its own response
//! cache directory, so request counts are exact.

use refeed::config::Config;
use refeed::error::HistoryError;
use refeed::fetch::Fetcher;
use refeed::history::{reconstruct, Level, ProgressLog};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_fetcher(name: &str) -> Fetcher {
    let cache_dir = std::env::temp_dir().join(format!("refeed_history_test_{name}"));
    let _ = std::fs::remove_dir_all(&cache_dir);
    Fetcher::new(&Config {
        cache_dir,
        download_delay_ms: 0,
        ..Config::default()
    })
    .unwrap()
}

fn ids(entries: &[refeed::feed::EntryRef]) -> Vec<&str> {
    entries.iter().map(|e| e.id.as_str()).collect()
}

// ============================================================================
// Complete documents
// ============================================================================

#[tokio::test]
async fn test_complete_feed_needs_one_fetch() {
    let body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:fh="http://purl.org/syndication/history/1.0">
  <title>Everything</title>
  <fh:complete/>
  <entry><id>a</id><title>A</title><published>2024-01-01T00:00:00+00:00</published></entry>
  <entry><id>b</id><title>B</title><published>2024-01-02T00:00:00+00:00</published></entry>
  <entry><id>c</id><title>C</title><published>2024-01-03T00:00:00+00:00</published></entry>
</feed>"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("complete");
    let log = ProgressLog::new();
    let url = format!("{}/feed", server.uri());

    let entries = reconstruct(&fetcher, &url, &log, 10).await.unwrap();

    assert_eq!(ids(&entries), ["a", "b", "c"]);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_complete_feed_with_no_entries_is_empty_not_an_error() {
    let body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:fh="http://purl.org/syndication/history/1.0">
  <title>Nothing yet</title>
  <fh:complete/>
</feed>"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("complete_empty");
    let url = format!("{}/feed", server.uri());

    let entries = reconstruct(&fetcher, &url, &ProgressLog::new(), 10)
        .await
        .unwrap();
    assert!(entries.is_empty());
}

// ============================================================================
// Subscription document resolution
// ============================================================================

#[tokio::test]
async fn test_resolution_converges_in_one_fetch_when_self_and_current_match() {
    let server = MockServer::start().await;
    let url = format!("{}/feed", server.uri());
    let body = format!(
        r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:fh="http://purl.org/syndication/history/1.0">
  <title>Stable</title>
  <fh:complete/>
  <link rel="self" href="{url}"/>
  <link rel="current" href="{url}"/>
  <entry><id>only</id><title>Only</title></entry>
</feed>"#
    );
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("converges");
    let entries = reconstruct(&fetcher, &url, &ProgressLog::new(), 10)
        .await
        .unwrap();

    assert_eq!(ids(&entries), ["only"]);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_current_link_redirects_to_the_subscription_document() {
    let server = MockServer::start().await;
    let old_url = format!("{}/old", server.uri());
    let new_url = format!("{}/new", server.uri());

    let old_body = format!(
        r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <link rel="current" href="{new_url}"/>
  <entry><id>stale</id><title>Stale</title></entry>
</feed>"#
    );
    let new_body = format!(
        r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:fh="http://purl.org/syndication/history/1.0">
  <fh:complete/>
  <link rel="current" href="{new_url}"/>
  <entry><id>fresh</id><title>Fresh</title></entry>
</feed>"#
    );

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(200).set_body_string(old_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string(new_body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("current_redirect");
    let log = ProgressLog::new();
    let entries = reconstruct(&fetcher, &old_url, &log, 10).await.unwrap();

    assert_eq!(ids(&entries), ["fresh"]);
    assert!(log
        .snapshot()
        .iter()
        .any(|e| e.level == Level::Info && e.message.contains("is not current")));
}

#[tokio::test]
async fn test_archive_without_current_fails() {
    let body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:fh="http://purl.org/syndication/history/1.0">
  <fh:archive/>
  <entry><id>orphan</id><title>Orphan</title></entry>
</feed>"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("archive_no_current");
    let url = format!("{}/archive", server.uri());

    let err = reconstruct(&fetcher, &url, &ProgressLog::new(), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::MissingCurrent(_)));
}

#[tokio::test]
async fn test_current_ping_pong_hits_the_redirection_cap() {
    let server = MockServer::start().await;
    let a_url = format!("{}/a", server.uri());
    let b_url = format!("{}/b", server.uri());

    let a_body = format!(
        r#"<feed xmlns="http://www.w3.org/2005/Atom"><link rel="current" href="{b_url}"/></feed>"#
    );
    let b_body = format!(
        r#"<feed xmlns="http://www.w3.org/2005/Atom"><link rel="current" href="{a_url}"/></feed>"#
    );

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string(a_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string(b_body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("ping_pong");
    let err = reconstruct(&fetcher, &a_url, &ProgressLog::new(), 4)
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::TooManyRedirections(_)));
}

#[tokio::test]
async fn test_feed_without_any_history_mechanism_is_unsupported() {
    let body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Plain</title>
  <entry><id>x</id><title>X</title></entry>
</feed>"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("unsupported");
    let url = format!("{}/feed", server.uri());

    let err = reconstruct(&fetcher, &url, &ProgressLog::new(), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::Unsupported(_)));
}

// ============================================================================
// Archive chains
// ============================================================================

#[tokio::test]
async fn test_archive_chain_merges_dedupes_and_sorts() {
    let server = MockServer::start().await;
    let archive_url = format!("{}/archive/1", server.uri());

    // current page lists [e3, e2], the archive lists [e2, e1]
    let current_body = format!(
        r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Chained</title>
  <link rel="prev-archive" href="{archive_url}"/>
  <entry><id>e3</id><title>Three</title><published>2024-01-03T00:00:00+00:00</published></entry>
  <entry><id>e2</id><title>Two</title><published>2024-01-02T00:00:00+00:00</published></entry>
</feed>"#
    );
    let archive_body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:fh="http://purl.org/syndication/history/1.0">
  <fh:archive/>
  <entry><id>e2</id><title>Two</title><published>2024-01-02T00:00:00+00:00</published></entry>
  <entry><id>e1</id><title>One</title><published>2024-01-01T00:00:00+00:00</published></entry>
</feed>"#;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(current_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/archive/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(archive_body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("chain");
    let log = ProgressLog::new();
    let url = format!("{}/feed", server.uri());

    let entries = reconstruct(&fetcher, &url, &log, 10).await.unwrap();

    assert_eq!(ids(&entries), ["e1", "e2", "e3"]);
    assert!(log
        .snapshot()
        .iter()
        .any(|e| e.level == Level::Debug && e.message.contains("duplicate entry e2")));
    // current + one archive
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_published_order_is_non_decreasing_after_traversal() {
    let server = MockServer::start().await;
    let archive_url = format!("{}/archive/1", server.uri());

    let current_body = format!(
        r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <link rel="prev-archive" href="{archive_url}"/>
  <entry><id>d</id><title>D</title><published>2024-02-01T00:00:00+00:00</published></entry>
  <entry><id>c</id><title>C</title><published>2024-01-15T00:00:00+00:00</published></entry>
</feed>"#
    );
    let archive_body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><id>b</id><title>B</title><published>2024-01-10T00:00:00+00:00</published></entry>
  <entry><id>a</id><title>A</title><published>2024-01-05T00:00:00+00:00</published></entry>
</feed>"#;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(current_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/archive/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(archive_body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("ordering");
    let url = format!("{}/feed", server.uri());
    let entries = reconstruct(&fetcher, &url, &ProgressLog::new(), 10)
        .await
        .unwrap();

    assert_eq!(ids(&entries), ["a", "b", "c", "d"]);
    for pair in entries.windows(2) {
        assert!(pair[0].published <= pair[1].published);
    }
}

// ============================================================================
// WordPress pagination
// ============================================================================

#[tokio::test]
async fn test_wordpress_pagination_walks_until_404() {
    let server = MockServer::start().await;
    let base_url = format!("{}/wp", server.uri());
    let page1_url = format!("{base_url}?feed=atom&order=ASC&orderby=modified");
    // & must be entity-escaped inside the XML attribute
    let page1_href = page1_url.replace('&', "&amp;");

    let base_body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>WP</title></feed>"#;
    let page1_body = format!(
        r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>WP</title>
  <link rel="self" href="{page1_href}"/>
  <entry><id>w1</id><title>W1</title><published>2024-01-01T00:00:00+00:00</published></entry>
  <entry><id>w2</id><title>W2</title><published>2024-01-02T00:00:00+00:00</published></entry>
</feed>"#
    );
    let page2_body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><id>w3</id><title>W3</title><published>2024-01-03T00:00:00+00:00</published></entry>
</feed>"#;

    // the bare URL identifies itself as WordPress only via the Link header
    Mock::given(method("GET"))
        .and(path("/wp"))
        .and(query_param_is_missing("feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(base_body).insert_header(
            "Link",
            "<https://blog.example.com/wp-json/>; rel=\"https://api.w.org/\"",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp"))
        .and(query_param("feed", "atom"))
        .and(query_param_is_missing("paged"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page1_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp"))
        .and(query_param("paged", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page2_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp"))
        .and(query_param("paged", "3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("wordpress");
    let entries = reconstruct(&fetcher, &base_url, &ProgressLog::new(), 10)
        .await
        .unwrap();

    assert_eq!(ids(&entries), ["w1", "w2", "w3"]);

    // page fetches: pages 1, 2, and the 404 at page 3
    let page_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query_pairs().any(|(k, _)| k == "feed"))
        .count();
    assert_eq!(page_fetches, 3);
}

#[tokio::test]
async fn test_wordpress_pagination_stops_on_an_empty_page() {
    let server = MockServer::start().await;
    let base_url = format!("{}/wp", server.uri());

    let base_body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <generator uri="https://wordpress.org/">WordPress</generator>
</feed>"#;
    let page1_body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><id>w1</id><title>W1</title><published>2024-01-01T00:00:00+00:00</published></entry>
</feed>"#;
    let empty_body = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom"/>"#;

    Mock::given(method("GET"))
        .and(path("/wp"))
        .and(query_param_is_missing("feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(base_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp"))
        .and(query_param("feed", "atom"))
        .and(query_param_is_missing("paged"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page1_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp"))
        .and(query_param("paged", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(empty_body))
        .mount(&server)
        .await;

    let fetcher = test_fetcher("wordpress_empty");
    let entries = reconstruct(&fetcher, &base_url, &ProgressLog::new(), 10)
        .await
        .unwrap();

    assert_eq!(ids(&entries), ["w1"]);
}
