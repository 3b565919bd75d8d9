//! Persistent SHA-256 cache
//!
//! Entries are keyed by canonical path and are valid only while the file's
//! `size:mtime_ns` stamp is unchanged. The cache is an owned value; callers
//! that share one across threads wrap it themselves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::digest::{hash_file_stamped, stamp};
use super::error::CanonicalError;
use crate::guard::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheRecord {
    meta: String,
    sha256: String,
}

#[derive(Debug, Default)]
pub struct DigestCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, CacheRecord>,
    dirty: bool,
}

impl DigestCache {
    /// Cache that never touches disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing or corrupt file starts an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "digest cache corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        debug!(path = %path.display(), entries = entries.len(), "digest cache loaded");
        Self {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 of the file at `path`, from cache when its stamp is unchanged
    pub fn digest(&mut self, path: &Path) -> Result<String, CanonicalError> {
        let resolved = fs::canonicalize(path).map_err(|source| CanonicalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let key = resolved.to_string_lossy().into_owned();

        let current = stamp(&resolved)?.cache_key();
        if let Some(record) = self.entries.get(&key) {
            if record.meta == current {
                return Ok(record.sha256.clone());
            }
        }

        let (sha256, stamped) = hash_file_stamped(&resolved)?;
        self.entries.insert(
            key,
            CacheRecord {
                meta: stamped.cache_key(),
                sha256: sha256.clone(),
            },
        );
        self.dirty = true;
        Ok(sha256)
    }

    /// Write the cache back atomically if anything changed
    pub fn persist(&mut self) -> anyhow::Result<()> {
        use anyhow::Context;

        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let bytes = serde_json::to_vec(&self.entries).context("serialize digest cache")?;
        write_atomic(path, &bytes)
            .with_context(|| format!("failed to persist digest cache {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }
}
