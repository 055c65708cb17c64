use thiserror::Error;

use crate::fetch::FetchError;

/// Terminal failures of a history reconstruction.
///
/// Outcomes are cached and handed to every consumer of the same feed, so
/// every variant is `Clone` and carries its context as a plain message
/// rather than a source error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// An archive page did not say where the current document lives.
    #[error("missing current link: {0}")]
    MissingCurrent(String),

    /// The feed declares no complete tag, no archive chain, and no
    /// WordPress markers.
    #[error("unsupported feed: {0}")]
    Unsupported(String),

    /// The self/current resolution loop never converged.
    #[error("too many redirections: {0}")]
    TooManyRedirections(String),

    /// An entry carries neither inline content nor an alternate link.
    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    /// The fetcher surfaced an HTTP or transport failure.
    #[error("fetch failed: {0}")]
    FetchFailed(String),
}

impl HistoryError {
    /// Short machine-readable tag for the error kind, used in rendered
    /// error pages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryError::MissingCurrent(_) => "missing_current",
            HistoryError::Unsupported(_) => "unsupported",
            HistoryError::TooManyRedirections(_) => "too_many_redirections",
            HistoryError::MalformedEntry(_) => "malformed_entry",
            HistoryError::FetchFailed(_) => "fetch_failed",
        }
    }
}

impl From<FetchError> for HistoryError {
    fn from(err: FetchError) -> Self {
        HistoryError::FetchFailed(err.to_string())
    }
}
