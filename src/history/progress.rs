use std::sync::{Arc, Mutex, MutexGuard};

/// Severity of a progress event. Mirrored into `tracing`; the textual
/// messages themselves are not a stable API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
}

/// One human-readable event recorded during a traversal.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub level: Level,
    pub message: String,
}

/// Append-only trace of a single traversal.
///
/// The traversal task is the only writer; consumers polling an in-progress
/// feed snapshot the log from other tasks and observe events in append
/// order. Cloning shares the underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.lock().push(ProgressEvent {
            level: Level::Info,
            message,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{message}");
        self.lock().push(ProgressEvent {
            level: Level::Debug,
            message,
        });
    }

    /// Copy of all events recorded so far, in append order.
    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProgressEvent>> {
        // a poisoned log only ever misses its final event
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}
