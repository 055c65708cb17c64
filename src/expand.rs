//! Source expansion: resolve retained entries back to the documents they
//! were discovered in and pull out the metadata rendering needs.
//!
//! Traversal keeps only id, timestamp, and source URL per entry. Before a
//! reconstructed feed can be rendered, each source document is re-read
//! (from the shared response cache, it was just fetched) and the title,
//! permalink or inline-content presence, and distinguishing hash prefix
//! are filled in per entry.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;

use crate::error::HistoryError;
use crate::feed::{extract, EntryRef};
use crate::fetch::{FetchRequest, Fetcher};
use crate::hash;

/// Render-ready metadata for one entry, keyed by entry id in the maps
/// this module produces.
#[derive(Debug, Clone)]
pub struct ExpandedEntry {
    pub source: String,
    pub published: Option<DateTime<Utc>>,
    pub title: String,
    /// Alternate HTML permalink; `None` when the entry carries inline
    /// content and will be served locally instead.
    pub link: Option<String>,
    /// Shortest hash prefix distinguishing this entry from its siblings
    /// within the same source.
    pub hash: String,
}

impl ExpandedEntry {
    /// `published` in the `YYYY-MM-DDTHH:MM:SSZ` form the serializer
    /// emits; empty when the source gave no timestamp.
    pub fn published_string(&self) -> String {
        self.published
            .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_default()
    }
}

/// Expand all entries, fetching each distinct source document once.
///
/// Per-source work runs concurrently; the merged result is deterministic
/// because the id sets are disjoint by construction of the partition.
///
/// # Panics
///
/// Panics if a source document no longer lists an id that traversal
/// observed in it, which can only mean the two passes disagree about the
/// document and is a bug rather than a recoverable condition.
pub async fn expand_entries(
    fetcher: &Fetcher,
    entries: &[EntryRef],
) -> Result<HashMap<String, ExpandedEntry>, HistoryError> {
    let mut by_source: HashMap<&str, HashSet<&str>> = HashMap::new();
    for entry in entries {
        by_source
            .entry(entry.source.as_str())
            .or_default()
            .insert(entry.id.as_str());
    }

    let expansions = try_join_all(
        by_source
            .iter()
            .map(|(&source, ids)| expand_source(fetcher, source, ids)),
    )
    .await?;

    let mut merged = HashMap::new();
    for expansion in expansions {
        merged.extend(expansion);
    }

    for entry in entries {
        assert!(
            merged.contains_key(&entry.id),
            "source {} no longer lists entry {}",
            entry.source,
            entry.id
        );
    }

    Ok(merged)
}

/// Expand the requested ids out of one source document and assign their
/// distinguishing hash prefixes.
async fn expand_source(
    fetcher: &Fetcher,
    source: &str,
    ids: &HashSet<&str>,
) -> Result<HashMap<String, ExpandedEntry>, HistoryError> {
    // traversal fetched this moments ago, take whatever the cache has
    let page = fetcher
        .fetch(FetchRequest::new(source).max_stale())
        .await?;
    let doc = extract(&page);

    let mut expanded = HashMap::new();
    for entry in &doc.entries {
        if !ids.contains(entry.id.as_str()) {
            continue;
        }

        let link = if entry.content.is_some() {
            None
        } else {
            match &entry.alternate {
                Some(href) => Some(href.clone()),
                None => {
                    return Err(HistoryError::MalformedEntry(format!(
                        "entry {} in {source} has neither inline content nor an alternate link",
                        entry.id
                    )))
                }
            }
        };

        expanded.insert(
            entry.id.clone(),
            ExpandedEntry {
                source: source.to_string(),
                published: entry.published,
                title: entry.title.clone(),
                link,
                hash: String::new(),
            },
        );
    }

    let prefixes = hash::distinct_prefixes(expanded.keys().map(String::as_str));
    for (id, entry) in &mut expanded {
        if let Some(prefix) = prefixes.get(id) {
            entry.hash = prefix.clone();
        }
    }

    Ok(expanded)
}
