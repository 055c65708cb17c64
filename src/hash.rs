//! Stable entry identifiers and their shortest distinguishing prefixes.
//!
//! Every entry id maps to the URL-safe base64 encoding of its SHA-256
//! digest, so it can be used as a path segment without further escaping.
//! Within one source document the full hashes are truncated to the
//! shortest prefix that still tells all siblings apart.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Full hash of an entry id: unpadded URL-safe base64 of SHA-256(id).
///
/// Deterministic and dependent only on the id, so prefixes assigned
/// earlier keep resolving as the feed grows.
pub fn entry_hash(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(id.as_bytes()))
}

/// Assign each id the shortest prefix of its full hash that no other id
/// in the set shares.
///
/// After sorting the full hashes lexicographically, the longest prefix an
/// entry shares with any other is achieved by one of its two immediate
/// neighbors; one character past that is the shortest distinguishing
/// prefix. Equal ids (or a SHA-256 collision) yield equal prefixes.
pub fn distinct_prefixes<'a, I>(ids: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hashed: Vec<(&str, String)> =
        ids.into_iter().map(|id| (id, entry_hash(id))).collect();
    hashed.sort_by(|a, b| a.1.cmp(&b.1));

    let lcps: Vec<usize> = hashed
        .windows(2)
        .map(|pair| common_prefix_len(&pair[0].1, &pair[1].1))
        .collect();

    hashed
        .iter()
        .enumerate()
        .map(|(i, (id, hash))| {
            let before = if i == 0 { 0 } else { lcps[i - 1] };
            let after = lcps.get(i).copied().unwrap_or(0);
            let keep = (before.max(after) + 1).min(hash.len());
            (id.to_string(), hash[..keep].to_string())
        })
        .collect()
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    // base64 output is ASCII, so byte positions are char positions
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}
