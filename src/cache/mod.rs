//! Content-addressed response cache.
//!
//! # Data Flow
//! ```text
//! put(url, body, content_type):
//!     key = sha256(url) → write "<key>.entry" (tmp + atomic rename)
//! get(url):
//!     read "<key>.entry" → expired? miss : (body copy, content type)
//! compaction task:
//!     periodic sweep → remove entries past their expiry
//! ```
//!
//! # Design Decisions
//! - Keys are byte-exact digests of the URL string: no normalization, two
//!   URLs differing in any byte cache separately
//! - One file per entry, JSON header line + raw body, replaced by atomic
//!   rename: a get racing a put sees the old or new entry, never a torn one
//! - Expiry is enforced at read time; physical reclamation is the sweep's job

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::config::schema::CacheConfig;
use crate::observability::metrics;

const ENTRY_SUFFIX: &str = ".entry";

/// Errors from cache storage operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Header stored on the first line of each entry file.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    content_type: String,
    /// Absolute expiry, seconds since the unix epoch.
    expires_at: u64,
}

/// Derive the cache key for a URL: lowercase hex SHA-256 of the exact string.
pub fn cache_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}

/// Disk-backed cache with one global TTL.
///
/// Entries are owned by the store; `get` hands out copies.
pub struct DiskCache {
    root: PathBuf,
    ttl_secs: u64,
    compaction_interval: Duration,
}

impl DiskCache {
    /// Open (or create) the cache directory. Failure here is fatal to the
    /// process: the proxy cannot serve safely without its store.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        let root = PathBuf::from(&config.dir);
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            ttl_secs: config.ttl_secs,
            compaction_interval: Duration::from_secs(config.compaction_interval_secs),
        })
    }

    /// Look up a URL. Logically expired entries are misses even if the file
    /// is still on disk.
    pub async fn get(&self, url: &str) -> Result<Option<(Bytes, String)>, CacheError> {
        let path = self.entry_path(url);

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (header, body) = split_entry(&raw)?;
        if header.expires_at <= unix_now() {
            return Ok(None);
        }

        Ok(Some((
            Bytes::copy_from_slice(body),
            header.content_type,
        )))
    }

    /// Store a response, stamping it with the cache-wide TTL.
    pub async fn put(&self, url: &str, body: &[u8], content_type: &str) -> Result<(), CacheError> {
        let header = EntryHeader {
            content_type: content_type.to_string(),
            expires_at: unix_now() + self.ttl_secs,
        };
        let mut raw = serde_json::to_vec(&header)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
        raw.push(b'\n');
        raw.extend_from_slice(body);

        let path = self.entry_path(url);
        // Unique tmp name so concurrent puts for the same key cannot rename
        // each other's partial file.
        let tmp = path.with_extension(format!("entry.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Remove a URL's entry. Removing an absent entry is not an error.
    pub async fn delete(&self, url: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.entry_path(url)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}{ENTRY_SUFFIX}", cache_key(url)))
    }

    /// One compaction sweep: remove entries whose expiry has passed.
    ///
    /// Only the header line is read per entry, not the body.
    async fn compact_once(&self) -> Result<usize, CacheError> {
        let now = unix_now();
        let mut removed = 0usize;

        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if !path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ENTRY_SUFFIX))
            {
                continue;
            }

            if entry_expired(&path, now).await && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            metrics::record_cache_entries_reclaimed(removed);
            tracing::debug!(removed, "Cache compaction reclaimed expired entries");
        }
        Ok(removed)
    }

    /// Periodic compaction loop. Exits when the shutdown signal fires.
    pub async fn run_compaction(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.compaction_interval);
        ticker.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.compact_once().await {
                        tracing::warn!(error = %e, "Cache compaction sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Cache compaction task stopping");
                    break;
                }
            }
        }
    }
}

/// Read an entry's header line and decide whether it is expired.
/// Unreadable or corrupt entries count as expired so the sweep removes them.
async fn entry_expired(path: &Path, now: u64) -> bool {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(_) => return false, // concurrently deleted
    };
    let mut line = String::new();
    if BufReader::new(file).read_line(&mut line).await.is_err() {
        return true;
    }
    match serde_json::from_str::<EntryHeader>(line.trim_end()) {
        Ok(header) => header.expires_at <= now,
        Err(_) => true,
    }
}

fn split_entry(raw: &[u8]) -> Result<(EntryHeader, &[u8]), CacheError> {
    let newline = raw
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| CacheError::Corrupt("missing header line".to_string()))?;
    let header: EntryHeader = serde_json::from_slice(&raw[..newline])
        .map_err(|e| CacheError::Corrupt(e.to_string()))?;
    Ok((header, &raw[newline + 1..]))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
