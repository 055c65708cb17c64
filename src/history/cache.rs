use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::Config;
use crate::error::HistoryError;
use crate::feed::EntryRef;
use crate::fetch::Fetcher;
use crate::history::progress::{ProgressEvent, ProgressLog};
use crate::history::traversal;

/// What a consumer gets back for a feed: the finished outcome, or a
/// snapshot of the running traversal's progress log.
#[derive(Debug, Clone)]
pub enum HistoryStatus {
    InProgress(Vec<ProgressEvent>),
    Finished(Result<Vec<EntryRef>, HistoryError>),
}

struct InProgress {
    done: watch::Receiver<bool>,
    log: ProgressLog,
}

#[derive(Default)]
struct State {
    in_progress: HashMap<String, InProgress>,
    finished: HashMap<String, Result<Vec<EntryRef>, HistoryError>>,
}

/// Process-wide request-to-result cache for history traversals.
///
/// At most one traversal runs per feed URL: the first consumer to ask
/// starts it, everyone else attaches to the same record. Outcomes, failed
/// ones included, are kept for the life of the process with no eviction,
/// so a broken feed is crawled once and not again.
pub struct HistoryCache {
    fetcher: Arc<Fetcher>,
    poll_wait: Duration,
    max_redirections: usize,
    state: Mutex<State>,
}

impl HistoryCache {
    pub fn new(fetcher: Arc<Fetcher>, config: &Config) -> Self {
        Self {
            fetcher,
            poll_wait: Duration::from_millis(config.poll_wait_ms),
            max_redirections: config.max_redirections,
            state: Mutex::new(State::default()),
        }
    }

    /// Fetch or attach to the history of `feed`.
    ///
    /// Returns the finished outcome when one exists or lands within the
    /// bounded wait; otherwise a snapshot of the traversal's progress so
    /// far. Consumers are expected to poll until finished.
    pub async fn get(self: &Arc<Self>, feed: &str) -> HistoryStatus {
        let (mut done, log) = {
            let mut state = self.lock();

            if let Some(outcome) = state.finished.get(feed) {
                return HistoryStatus::Finished(outcome.clone());
            }

            match state.in_progress.get(feed) {
                Some(record) => (record.done.clone(), record.log.clone()),
                // The map insert, the spawn, and the completion wiring all
                // happen under this one lock acquisition, so no concurrent
                // caller can observe a gap and start a second traversal.
                None => {
                    let log = ProgressLog::new();
                    let (tx, rx) = watch::channel(false);
                    state.in_progress.insert(
                        feed.to_string(),
                        InProgress {
                            done: rx.clone(),
                            log: log.clone(),
                        },
                    );
                    self.spawn_traversal(feed.to_string(), log.clone(), tx);
                    (rx, log)
                }
            }
        };

        // the watch channel remembers a send that happens between the
        // unlock above and this wait, so completion is never missed
        if tokio::time::timeout(self.poll_wait, done.changed()).await.is_ok() {
            if let Some(outcome) = self.lock().finished.get(feed) {
                return HistoryStatus::Finished(outcome.clone());
            }
        }

        HistoryStatus::InProgress(log.snapshot())
    }

    fn spawn_traversal(self: &Arc<Self>, feed: String, log: ProgressLog, tx: watch::Sender<bool>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(feed = %feed, "starting history traversal");
            let outcome =
                traversal::reconstruct(&this.fetcher, &feed, &log, this.max_redirections).await;

            match &outcome {
                Ok(entries) => {
                    tracing::info!(feed = %feed, entries = entries.len(), "history traversal finished")
                }
                Err(e) => tracing::warn!(feed = %feed, error = %e, "history traversal failed"),
            }

            let mut state = this.lock();
            state.in_progress.remove(&feed);
            state.finished.insert(feed, outcome);
            drop(state);

            // a send error just means nobody is currently waiting
            let _ = tx.send(true);
        });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
