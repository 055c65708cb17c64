//! Rebuilds the full history of an RSS/Atom feed.
//!
//! Most feeds only expose their newest entries. Feeds that implement
//! RFC 5005 chain immutable archive documents behind the live one via
//! `rel="prev-archive"` links; WordPress feeds can be paged with query
//! parameters instead. This crate walks whichever mechanism a feed offers,
//! merges the entry sets with duplicate suppression, and republishes a
//! stable, oldest-first Atom document.

pub mod atom;
pub mod config;
pub mod error;
pub mod expand;
pub mod feed;
pub mod fetch;
pub mod hash;
pub mod history;
pub mod server;
