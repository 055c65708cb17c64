use std::collections::HashMap;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use reqwest::header::CONTENT_LOCATION;

use crate::fetch::FetchedPage;

/// Namespace that marks a feed as a live document or an immutable archive
/// and chains archives together via `rel="prev-archive"` links.
pub const FEED_HISTORY_NS: &str = "http://purl.org/syndication/history/1.0";

/// A normalized view of one fetched feed document.
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    /// Effective URL: `Content-Location`, falling back to the final
    /// request URL.
    pub url: String,
    pub title: Option<String>,
    pub is_archive: bool,
    pub is_complete: bool,
    /// Feed-level links keyed by `rel`; the last occurrence of a repeated
    /// relation wins.
    pub links: HashMap<String, String>,
    /// Generator identity strings (name, then URI and version when given).
    pub generator: Vec<String>,
    pub entries: Vec<FeedEntry>,
}

/// One entry as it appears in a single source document.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub published: Option<DateTime<Utc>>,
    /// Inline HTML content, when the entry carries any.
    pub content: Option<String>,
    /// First `rel="alternate"` link (a missing `rel` counts as alternate).
    pub alternate: Option<String>,
    /// Effective URL of the document this entry was discovered in.
    pub source: String,
}

/// The slim projection of an entry that traversal outcomes retain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub id: String,
    pub published: Option<DateTime<Utc>>,
    pub source: String,
}

impl FeedEntry {
    pub fn to_ref(&self) -> EntryRef {
        EntryRef {
            id: self.id.clone(),
            published: self.published,
            source: self.source.clone(),
        }
    }
}

/// Parse a fetched response into a [`FeedDocument`].
///
/// Malformed XML is not fatal: the result then simply has no entries, and
/// callers treat that as "nothing at this page". Entries without an id are
/// dropped here, since they cannot participate in deduplication.
pub fn extract(page: &FetchedPage) -> FeedDocument {
    let url = page
        .headers
        .get(CONTENT_LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| page.final_url.clone());

    let (is_archive, is_complete) = history_flags(&page.body);

    let parsed = match parser::parse(page.body.as_slice()) {
        Ok(feed) => feed,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "document did not parse as a feed");
            return FeedDocument {
                url,
                is_archive,
                is_complete,
                ..FeedDocument::default()
            };
        }
    };

    let mut links = HashMap::new();
    for link in &parsed.links {
        let rel = link.rel.as_deref().unwrap_or("alternate");
        links.insert(rel.to_string(), link.href.clone());
    }

    let mut generator = Vec::new();
    if let Some(gen) = &parsed.generator {
        generator.push(gen.content.clone());
        generator.extend(gen.uri.clone());
        generator.extend(gen.version.clone());
    }

    let entries = parsed
        .entries
        .into_iter()
        .filter(|entry| !entry.id.is_empty())
        .map(|entry| FeedEntry {
            id: entry.id,
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            published: entry.published.or(entry.updated),
            content: entry.content.and_then(|c| c.body),
            alternate: entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .map(|l| l.href.clone()),
            source: url.clone(),
        })
        .collect();

    FeedDocument {
        url,
        title: parsed.title.map(|t| t.content),
        is_archive,
        is_complete,
        links,
        generator,
        entries,
    }
}

/// Scan for `archive` / `complete` elements bound to the feed-history
/// namespace, whatever short name the document chose for it.
///
/// Only direct children of the feed root count: an element with the same
/// name nested inside an entry's inline XHTML content says nothing about
/// the document itself.
fn history_flags(body: &[u8]) -> (bool, bool) {
    let mut reader = NsReader::from_reader(body);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut is_archive = false;
    let mut is_complete = false;

    loop {
        match reader.read_resolved_event_into(&mut buf) {
            Ok((resolved, Event::Start(e))) => {
                depth += 1;
                if depth == 2 {
                    mark_history_flag(&resolved, &e, &mut is_archive, &mut is_complete);
                }
            }
            Ok((resolved, Event::Empty(e))) => {
                if depth == 1 {
                    mark_history_flag(&resolved, &e, &mut is_archive, &mut is_complete);
                }
            }
            Ok((_, Event::End(_))) => depth = depth.saturating_sub(1),
            Ok((_, Event::Eof)) => break,
            Err(_) => break, // flags are best-effort on malformed XML
            _ => {}
        }
        buf.clear();
    }

    (is_archive, is_complete)
}

fn mark_history_flag(
    resolved: &ResolveResult,
    element: &BytesStart,
    is_archive: &mut bool,
    is_complete: &mut bool,
) {
    if let ResolveResult::Bound(Namespace(ns)) = resolved {
        if *ns == FEED_HISTORY_NS.as_bytes() {
            let name = element.local_name();
            if name.as_ref() == b"archive" {
                *is_archive = true;
            } else if name.as_ref() == b"complete" {
                *is_complete = true;
            }
        }
    }
}
