//! Feed document extraction.
//!
//! Turns a fetched HTTP response into a normalized [`FeedDocument`]: the
//! effective URL, the feed-history flags, the named feed-level links, the
//! generator identity, and the entry list. Everything downstream (history
//! traversal, source expansion, the entry handler) works from this view
//! rather than from raw `feed-rs` types.

mod extract;

pub use extract::{extract, EntryRef, FeedDocument, FeedEntry, FEED_HISTORY_NS};
