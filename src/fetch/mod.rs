//! HTTP fetching with a shared on-disk response cache.
//!
//! The traversal engine, source expansion, and the entry handler all go
//! through one [`Fetcher`]. Responses are cached to disk keyed by request
//! URL; `max-stale` requests serve any stored copy without revalidation,
//! which is what makes re-reading archive pages and just-traversed sources
//! free.

mod cache;
mod client;

pub use client::{FetchError, FetchRequest, FetchedPage, Fetcher};
