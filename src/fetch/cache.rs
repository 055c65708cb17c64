use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::client::FetchedPage;

/// One stored HTTP exchange. Bodies are base64 inside the JSON document so
/// a cache entry is a single self-describing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CachedResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    body: String,
    pub fetched_at: i64,
    pub max_age: u64,
}

impl CachedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Still within the freshness lifetime the origin granted.
    pub fn is_fresh(&self) -> bool {
        let age = Utc::now().timestamp() - self.fetched_at;
        age >= 0 && (age as u64) < self.max_age
    }

    pub fn to_page(&self) -> FetchedPage {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        FetchedPage {
            final_url: self.final_url.clone(),
            status: self.status,
            headers,
            body: BASE64.decode(&self.body).unwrap_or_default(),
        }
    }
}

/// Shared on-disk response cache, one JSON file per request URL.
///
/// Every response is stored regardless of response cache directives; the
/// freshness lifetime only controls whether a later fetch revalidates.
/// Archive pages and just-traversed sources are re-read through here with
/// `max-stale`, which serves any stored copy without revalidation.
#[derive(Debug)]
pub(crate) struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn load(&self, url: &str) -> io::Result<Option<CachedResponse>> {
        let path = self.entry_path(url);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match serde_json::from_slice(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable cache entry");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    pub fn store(&self, url: &str, page: &FetchedPage, max_age: u64) -> io::Result<()> {
        let entry = CachedResponse {
            url: url.to_string(),
            final_url: page.final_url.clone(),
            status: page.status,
            headers: page
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            body: BASE64.encode(&page.body),
            fetched_at: Utc::now().timestamp(),
            max_age,
        };
        self.write(url, &entry)
    }

    /// Refresh the stored timestamp after a 304 revalidation.
    pub fn touch(&self, url: &str, entry: &mut CachedResponse) -> io::Result<()> {
        entry.fetched_at = Utc::now().timestamp();
        self.write(url, entry)
    }

    fn write(&self, url: &str, entry: &CachedResponse) -> io::Result<()> {
        let path = self.entry_path(url);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(entry)?)?;
        fs::rename(&tmp, &path)
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{:x}.json", Sha256::digest(url.as_bytes())))
    }
}
