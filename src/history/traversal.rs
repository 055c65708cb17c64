use std::collections::HashSet;

use reqwest::header::LINK;
use url::Url;

use crate::error::HistoryError;
use crate::feed::{extract, EntryRef, FeedDocument};
use crate::fetch::{FetchRequest, FetchedPage, Fetcher};
use crate::history::progress::ProgressLog;

/// Reconstruct the full entry list of a feed.
///
/// Resolves the current subscription document, picks a completion strategy
/// (complete document, archive chain, or WordPress pagination), merges the
/// entry sets, and returns them oldest-first. Progress is recorded on the
/// given log as the traversal runs.
pub async fn reconstruct(
    fetcher: &Fetcher,
    feed_url: &str,
    log: &ProgressLog,
    max_redirections: usize,
) -> Result<Vec<EntryRef>, HistoryError> {
    let (url, page, base) = resolve_current(fetcher, feed_url, log, max_redirections).await?;

    let mut entries = if base.is_complete {
        log.info(format!("document {url} declares itself complete"));
        base.entries.iter().map(|e| e.to_ref()).collect()
    } else if base.links.contains_key("prev-archive") {
        walk_archives(fetcher, &url, base, log).await?
    } else if wordpress_markers(&page, &base) {
        log.info(format!("document {url} looks like WordPress, probing paged feeds"));
        paginate_wordpress(fetcher, &url, log).await?
    } else {
        return Err(HistoryError::Unsupported(format!(
            "document {url} has no <complete> tag and no rel='prev-archive' link"
        )));
    };

    sort_entries(&mut entries);
    Ok(entries)
}

/// Follow `self` and `current` declarations until the URL converges on the
/// subscription document. Every change of URL triggers a fresh fetch so
/// caching and relative-link resolution stay consistent.
async fn resolve_current(
    fetcher: &Fetcher,
    feed_url: &str,
    log: &ProgressLog,
    max_redirections: usize,
) -> Result<(String, FetchedPage, FeedDocument), HistoryError> {
    let mut url = feed_url.to_string();

    for _ in 0..max_redirections {
        let page = fetcher.fetch(FetchRequest::new(&url)).await?;
        let doc = extract(&page);

        if let Some(self_url) = doc.links.get("self") {
            if *self_url != url {
                log.info(format!("document {url} came from {self_url}"));
                url = self_url.clone();
                continue;
            }
        }

        match doc.links.get("current") {
            Some(current) if *current != url => {
                log.info(format!(
                    "document {url} is not current, trying again from {current}"
                ));
                url = current.clone();
                continue;
            }
            Some(_) => {}
            None if doc.is_archive => {
                return Err(HistoryError::MissingCurrent(format!(
                    "document {url} is an archive and doesn't specify the current document"
                )));
            }
            None => {}
        }

        // found the subscription document
        return Ok((url, page, doc));
    }

    Err(HistoryError::TooManyRedirections(format!(
        "gave up resolving {feed_url} after {max_redirections} fetches"
    )))
}

/// Walk the `prev-archive` chain, newest to oldest, merging entries with
/// first-occurrence-wins deduplication.
async fn walk_archives(
    fetcher: &Fetcher,
    url: &str,
    base: FeedDocument,
    log: &ProgressLog,
) -> Result<Vec<EntryRef>, HistoryError> {
    let mut entries: Vec<EntryRef> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut doc = base;
    let mut referer = url.to_string();

    loop {
        for entry in &doc.entries {
            if seen.insert(entry.id.clone()) {
                entries.push(entry.to_ref());
            } else {
                log.debug(format!("discarding duplicate entry {}", entry.id));
            }
        }

        let Some(prev) = doc.links.get("prev-archive").cloned() else {
            break;
        };
        if !visited.insert(prev.clone()) {
            log.info(format!("archive chain loops back to {prev}, stopping"));
            break;
        }

        log.info(format!("fetching archive {prev}"));
        // archive documents are immutable, always take them from the cache
        let page = fetcher
            .fetch(FetchRequest::new(&prev).referer(&referer).max_stale())
            .await?;
        doc = extract(&page);
        referer = prev;
    }

    Ok(entries)
}

/// True when the response or document carries WordPress fingerprints: a
/// `Link` header pointing into the wp-json API, or a generator identity
/// naming wordpress.com / wordpress.org.
fn wordpress_markers(page: &FetchedPage, doc: &FeedDocument) -> bool {
    let link_header = page
        .headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("api.w.org"));

    link_header
        || doc.generator.iter().any(|identity| {
            let identity = identity.to_lowercase();
            identity.contains("wordpress.com") || identity.contains("wordpress.org")
        })
}

/// Page through a WordPress feed with `paged=N`, oldest first, until the
/// server 404s (or hands back a page with no entries).
async fn paginate_wordpress(
    fetcher: &Fetcher,
    url: &str,
    log: &ProgressLog,
) -> Result<Vec<EntryRef>, HistoryError> {
    let first = with_query(url, &[("feed", "atom"), ("order", "ASC"), ("orderby", "modified")])?;
    let page = fetcher.fetch(FetchRequest::new(&first)).await?;
    let doc = extract(&page);

    let mut canonical = doc
        .links
        .get("self")
        .cloned()
        .unwrap_or_else(|| doc.url.clone());
    let mut entries: Vec<EntryRef> = doc.entries.iter().map(|e| e.to_ref()).collect();

    for page_no in 2u32.. {
        let next = with_query(&canonical, &[("paged", &page_no.to_string())])?;
        log.info(format!("fetching page {page_no} at {next}"));
        let page = fetcher
            .fetch(FetchRequest::new(&next).referer(&canonical).allow_status(404))
            .await?;

        if page.status == 404 {
            log.info(format!("page {page_no} does not exist, pagination done"));
            break;
        }

        let doc = extract(&page);
        if doc.entries.is_empty() {
            log.info(format!("page {page_no} has no entries, pagination done"));
            break;
        }

        entries.extend(doc.entries.iter().map(|e| e.to_ref()));
        canonical = next;
    }

    Ok(entries)
}

/// Rewrite a URL's query string, overriding the given keys and preserving
/// everything else.
fn with_query(url: &str, overrides: &[(&str, &str)]) -> Result<String, HistoryError> {
    let mut parsed = Url::parse(url)
        .map_err(|e| HistoryError::FetchFailed(format!("invalid URL {url}: {e}")))?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !overrides.iter().any(|(name, _)| key == name))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        for (key, value) in overrides {
            query.append_pair(key, value);
        }
    }

    Ok(parsed.into())
}

/// Order entries oldest-first.
///
/// A single ascending stable sort would break ties by current position,
/// but entries with identical or missing timestamps are assumed to have
/// been listed newest-first within their source document. Sorting
/// descending-stable and reversing puts tied entries oldest-first too,
/// with undated entries at the front of the result.
fn sort_entries(entries: &mut Vec<EntryRef>) {
    entries.sort_by(|a, b| b.published.cmp(&a.published));
    entries.reverse();
}
