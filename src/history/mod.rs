//! History reconstruction: the traversal state machine, the process-wide
//! request-coalescing cache in front of it, and the progress log consumers
//! read while a traversal runs.

mod cache;
mod progress;
mod traversal;

pub use cache::{HistoryCache, HistoryStatus};
pub use progress::{Level, ProgressEvent, ProgressLog};
pub use traversal::reconstruct;
