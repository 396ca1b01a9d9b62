//! Cache index: fingerprint → canonical job id for completed conversions.
//!
//! An entry is written only after its job reaches `done` — never
//! speculatively — so a lookup hit always names a job whose storage holds a
//! complete result. Entries are never remapped in place; invalidation is
//! deletion.
//!
//! Two conversions of the same document may race (both miss the cache and
//! run). That is fine: at-most-one-is-canonical, not at-most-one-runs. The
//! first `record` call wins; the duplicate is a silent no-op and the loser's
//! result is simply never referenced by the index.
//!
//! The index is durable: it persists itself as a small JSON document under
//! the storage root (atomic tmp + rename) and reloads at startup, so cached
//! results survive process restarts. Persistence failures are logged, not
//! fatal — the in-memory entry still serves the current process.

use crate::error::ServiceError;
use crate::registry::JobId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Number of hex characters kept from the SHA-256 content hash.
const CONTENT_HASH_LEN: usize = 16;

/// Normalised cache key for one document.
///
/// Derived from the PDF's title metadata when present (`title:` prefix),
/// otherwise from a content hash of the uploaded bytes (`sha256:` prefix) so
/// identical untitled files still dedupe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build a fingerprint from title metadata.
    ///
    /// Normalisation (trim, collapse runs of whitespace, lowercase) makes the
    /// key stable across producers that pad or re-case the title field.
    pub fn from_title(title: &str) -> Self {
        let normalised = title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Fingerprint(format!("title:{normalised}"))
    }

    /// Fallback fingerprint: truncated SHA-256 of the raw upload.
    pub fn from_content(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let hex: String = digest
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Fingerprint(format!("sha256:{}", &hex[..CONTENT_HASH_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent fingerprint → job mapping.
///
/// Dependency-injected, like the registry: tests construct isolated
/// instances with [`CacheIndex::in_memory`].
#[derive(Debug)]
pub struct CacheIndex {
    entries: RwLock<HashMap<Fingerprint, JobId>>,
    /// JSON file backing the index; `None` for in-memory (test) instances.
    path: Option<PathBuf>,
}

impl CacheIndex {
    /// Volatile index with no backing file.
    pub fn in_memory() -> Self {
        CacheIndex {
            entries: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Open (or create) a durable index backed by the given JSON file.
    ///
    /// A missing file is an empty index. An unreadable or unparsable file is
    /// logged and treated as empty rather than refusing to start: the index
    /// is a cache, and every entry can be rebuilt by reconverting.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<Fingerprint, JobId>>(&bytes) {
                Ok(map) => {
                    debug!("Loaded {} cache entries from {}", map.len(), path.display());
                    map
                }
                Err(e) => {
                    warn!("Cache index at {} is unparsable ({e}); starting empty", path.display());
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("Cannot read cache index at {} ({e}); starting empty", path.display());
                HashMap::new()
            }
        };
        CacheIndex {
            entries: RwLock::new(entries),
            path: Some(path),
        }
    }

    /// O(1) lookup of the canonical job for a fingerprint.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<JobId> {
        self.entries
            .read()
            .expect("cache index lock poisoned")
            .get(fingerprint)
            .copied()
    }

    /// File a completed job under its fingerprint. First writer wins.
    ///
    /// Called exactly once per successful job, strictly after the registry's
    /// `done` transition. A duplicate for the same fingerprint (two racing
    /// conversions of the same document) is a silent no-op.
    pub fn record(&self, fingerprint: Fingerprint, job_id: JobId) {
        {
            let mut entries = self.entries.write().expect("cache index lock poisoned");
            if let Some(existing) = entries.get(&fingerprint) {
                debug!(
                    "Cache entry for '{fingerprint}' already points at job {existing}; \
                     ignoring duplicate record for job {job_id}"
                );
                return;
            }
            entries.insert(fingerprint.clone(), job_id);
        }
        debug!("Cached '{fingerprint}' -> job {job_id}");
        if let Err(e) = self.persist() {
            warn!("Failed to persist cache index: {e}");
        }
    }

    /// Drop an entry whose storage has gone missing. Entries are never
    /// overwritten in place; deletion is the only form of invalidation.
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        let removed = self
            .entries
            .write()
            .expect("cache index lock poisoned")
            .remove(fingerprint);
        if let Some(job_id) = removed {
            warn!("Invalidated cache entry '{fingerprint}' (was job {job_id})");
            if let Err(e) = self.persist() {
                warn!("Failed to persist cache index: {e}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("cache index lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomic write of the whole index: temp file in the same directory,
    /// then rename over the target.
    fn persist(&self) -> Result<(), ServiceError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let entries = self.entries.read().expect("cache index lock poisoned");
        let json = serde_json::to_vec_pretty(&*entries)
            .map_err(|e| ServiceError::Internal(format!("cache index serialisation: {e}")))?;
        drop(entries);
        write_atomic(path, &json)
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ServiceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ServiceError::storage(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| ServiceError::storage(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ServiceError::storage(path, e))
}
