//! HTTP surface: the export endpoint, the per-entry content endpoint, and
//! the static stylesheet.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::atom::{self, AtomEntry};
use crate::config::Config;
use crate::error::HistoryError;
use crate::expand;
use crate::feed::{extract, EntryRef};
use crate::fetch::{FetchRequest, Fetcher};
use crate::hash::entry_hash;
use crate::history::{HistoryCache, HistoryStatus, ProgressEvent};

const STYLESHEET_URL: &str = "/static/reader.xsl";

/// Encoding for source URLs embedded as the wildcard segment of local
/// entry links. Everything that could split the path early (`?`, `#`, `%`,
/// `&`, spaces) is escaped; `/` and the other unreserved URL characters
/// stay literal so the wildcard route still matches the whole URL.
const SOURCE_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b':')
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// Local content URL for an entry: `/{hash}/{source}` with the source URL
/// percent-encoded to survive the path/query split. The handler side gets
/// it back decoded by the router.
fn local_entry_link(hash: &str, source: &str) -> String {
    format!("/{hash}/{}", utf8_percent_encode(source, SOURCE_SEGMENT))
}

#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<Fetcher>,
    pub history: Arc<HistoryCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/feed", get(export_feed))
        .route("/{hash}/{*source}", get(entry_content))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(addr = %config.bind, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Render a reconstructed history as an Atom document.
///
/// Expands the retained entries against their source documents, titles the
/// output after the subscription document, and fills entries that carry
/// inline content with a local `/{hash}/{source}` link served by
/// [`entry_content`].
pub async fn build_document(
    fetcher: &Fetcher,
    feed_url: &str,
    entries: &[EntryRef],
    stylesheet: &str,
) -> Result<String, HistoryError> {
    let expanded = expand::expand_entries(fetcher, entries).await?;

    let page = fetcher
        .fetch(FetchRequest::new(feed_url).max_stale())
        .await?;
    let title = extract(&page)
        .title
        .unwrap_or_else(|| feed_url.to_string());

    let atom_entries: Vec<AtomEntry> = entries
        .iter()
        .map(|entry| {
            let meta = &expanded[&entry.id];
            AtomEntry {
                id: entry.id.clone(),
                title: meta.title.clone(),
                published: meta.published_string(),
                link: meta
                    .link
                    .clone()
                    .unwrap_or_else(|| local_entry_link(&meta.hash, &meta.source)),
            }
        })
        .collect();

    Ok(atom::render(&title, &atom_entries, stylesheet))
}

#[derive(Debug)]
enum AppError {
    History(HistoryError),
    NoSuchEntry,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::History(err) => {
                let status = match err {
                    HistoryError::Unsupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (
                    status,
                    format!("history fetch failed ({}): {err}\n", err.kind()),
                )
                    .into_response()
            }
            AppError::NoSuchEntry => {
                (StatusCode::NOT_FOUND, "no entry matches that hash\n").into_response()
            }
        }
    }
}

impl From<HistoryError> for AppError {
    fn from(err: HistoryError) -> Self {
        AppError::History(err)
    }
}

async fn index() -> impl IntoResponse {
    "refeed: request /feed?url=<feed URL> to reconstruct a feed's full history\n"
}

#[derive(Deserialize)]
struct ExportParams {
    url: String,
}

async fn export_feed(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> Result<Response, AppError> {
    match state.history.get(&params.url).await {
        HistoryStatus::InProgress(events) => Ok(progress_response(&events)),
        HistoryStatus::Finished(Err(err)) => Err(err.into()),
        HistoryStatus::Finished(Ok(entries)) => {
            let document =
                build_document(&state.fetcher, &params.url, &entries, STYLESHEET_URL).await?;
            Ok((
                [(header::CONTENT_TYPE, "application/xml")],
                document,
            )
                .into_response())
        }
    }
}

/// Progress view for a traversal that has not finished yet: the log so
/// far, refreshing itself until the outcome lands.
fn progress_response(events: &[ProgressEvent]) -> Response {
    let mut body = String::from("history fetch in progress...\n\n");
    for event in events {
        body.push_str(&event.message);
        body.push('\n');
    }
    (
        [
            (
                HeaderName::from_static("content-type"),
                "text/plain; charset=utf-8",
            ),
            (HeaderName::from_static("refresh"), "2"),
        ],
        body,
    )
        .into_response()
}

/// Serve an entry's inline content by distinguishing-prefix match against
/// its source document.
///
/// Prefix matching (not equality) keeps previously handed-out short hashes
/// working even after the source grows entries that lengthen some of them.
async fn entry_content(
    State(state): State<AppState>,
    Path((hash, source)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if hash.is_empty() {
        return Err(AppError::NoSuchEntry);
    }

    let page = state
        .fetcher
        .fetch(FetchRequest::new(&source).max_stale())
        .await
        .map_err(|e| AppError::History(e.into()))?;
    let doc = extract(&page);

    for entry in &doc.entries {
        if entry_hash(&entry.id).starts_with(&hash) {
            if let Some(content) = &entry.content {
                return Ok((
                    [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                    content.clone(),
                )
                    .into_response());
            }
        }
    }

    Err(AppError::NoSuchEntry)
}
