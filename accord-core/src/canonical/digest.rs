//! SHA-256 helpers for artifact and material hashing
//!
//! File hashing streams in 8 KiB chunks and compares size and mtime before
//! and after reading so a concurrent writer is reported as a race instead of
//! producing a digest of torn content.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs::{self, File, Metadata};
use std::io::Read;
use std::ops::Range;
use std::path::Path;
use std::time::SystemTime;

use super::error::CanonicalError;

/// Digest algorithm key used in digest sets
pub const SHA256: &str = "sha256";

static INLINE_DIGEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"digest\s*:\s*\{[^}]*\}").expect("valid inline digest regex"));

static SHA256_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\s*-?\s*sha256\s*:)[^\n]*$").expect("valid sha256 line regex")
});

static SHA256_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid hex regex"));

/// Hash a byte slice, returning lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// True for exactly 64 lowercase hex characters
pub fn is_sha256_hex(value: &str) -> bool {
    SHA256_HEX.is_match(value)
}

/// Digest of an artifact with digest values inside its metadata block blanked
///
/// Lets the artifact carry its own material digests without making its
/// subject digest self-referential. Bytes without a metadata block are hashed
/// as-is.
pub fn content_digest(bytes: &[u8]) -> String {
    sha256_hex(&digest_exempt_content(bytes))
}

pub fn digest_exempt_content(bytes: &[u8]) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return bytes.to_vec();
    };
    let Some(range) = super::header::locate_block(text).map(|block| block.range) else {
        return bytes.to_vec();
    };
    blank_digests(text, range).into_bytes()
}

fn blank_digests(text: &str, range: Range<usize>) -> String {
    let block = &text[range.clone()];
    let inline_blanked = INLINE_DIGEST.replace_all(block, "digest: {}");
    let blanked = SHA256_LINE.replace_all(&inline_blanked, "$1");

    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..range.start]);
    out.push_str(&blanked);
    out.push_str(&text[range.end..]);
    out
}

/// Size and modification time captured around a hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub mtime_ns: u128,
}

impl FileStamp {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            size: metadata.len(),
            mtime_ns,
        }
    }

    /// `size:mtime_ns`, the cache validity key
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.size, self.mtime_ns)
    }
}

/// Stat a file without following a final symlink
pub fn stamp(path: &Path) -> Result<FileStamp, CanonicalError> {
    fs::metadata(path)
        .map(|m| FileStamp::from_metadata(&m))
        .map_err(|source| CanonicalError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Hash a file, failing with `HashRace` if it changed while being read
pub fn hash_file_stable(path: &Path) -> Result<String, CanonicalError> {
    let (digest, _) = hash_file_stamped(path)?;
    Ok(digest)
}

/// Like [`hash_file_stable`], also returning the stamp the digest is valid for
pub fn hash_file_stamped(path: &Path) -> Result<(String, FileStamp), CanonicalError> {
    let io_err = |source| CanonicalError::Io {
        path: path.to_path_buf(),
        source,
    };

    let before = stamp(path)?;
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).map_err(io_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let after = stamp(path)?;

    if before != after {
        tracing::warn!(path = %path.display(), "file changed during hashing");
        return Err(CanonicalError::HashRace {
            path: path.to_path_buf(),
        });
    }
    Ok((hex::encode(hasher.finalize()), after))
}
