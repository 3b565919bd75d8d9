//! Guarded atomic writes
//!
//! Every write is authorised first, lands in a unique sibling temp file and
//! is renamed into place. After the rename the path is authorised again and
//! must resolve to the same location, otherwise the file is removed.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::capability::CapabilityDescriptor;
use super::error::ScopeError;
use super::resolve::{CanonicalPath, PathViolation};

/// Unique temp path next to `target`: `.<name>.<pid>.<uuid>.tmp`
pub fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let tmp_name = format!(
        ".{}.{}.{}.tmp",
        name,
        std::process::id(),
        Uuid::now_v7().simple()
    );
    target.with_file_name(tmp_name)
}

/// Write `bytes` to `target` through a temp file and rename. No scope checks.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_sibling(target);
    let result = write_file_synced(&tmp, bytes).and_then(|_| fs::rename(&tmp, target));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Writer bound to one capability descriptor
pub struct GuardedWriter<'a> {
    capability: &'a CapabilityDescriptor,
}

impl<'a> GuardedWriter<'a> {
    pub fn new(capability: &'a CapabilityDescriptor) -> Self {
        Self { capability }
    }

    pub fn capability(&self) -> &CapabilityDescriptor {
        self.capability
    }

    /// Atomically replace `requested` with `bytes`
    pub fn write(&self, requested: impl AsRef<Path>, bytes: &[u8]) -> Result<CanonicalPath, ScopeError> {
        let requested = requested.as_ref();
        let target = self.capability.authorize_write(requested)?;
        let failed = |reason: String| ScopeError::WriteFailed {
            path: target.absolute.clone(),
            reason,
        };

        if let Some(parent) = target.absolute.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(format!("create parent: {e}")))?;
        }

        let tmp = temp_sibling(&target.absolute);
        if let Err(e) = write_file_synced(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(failed(format!("write temp file: {e}")));
        }

        if is_symlink(&target.absolute) {
            let _ = fs::remove_file(&tmp);
            let err = ScopeError::PathForbidden {
                path: requested.to_string_lossy().into_owned(),
                violation: PathViolation::Symlink {
                    link: target.relative.clone(),
                },
            };
            err.log_if_security_critical();
            return Err(err);
        }

        if let Err(e) = fs::rename(&tmp, &target.absolute) {
            let _ = fs::remove_file(&tmp);
            return Err(failed(format!("rename: {e}")));
        }

        // Re-validate: the path must still authorise and land in the same place
        match self.capability.authorize_write(requested) {
            Ok(after) if after.absolute == target.absolute => {
                debug!(path = %target.relative, bytes = bytes.len(), "guarded write complete");
                Ok(target)
            }
            Ok(after) => {
                warn!(
                    before = %target.relative,
                    after = %after.relative,
                    "path moved during write, removing"
                );
                let _ = fs::remove_file(&target.absolute);
                Err(failed("path changed during write".to_string()))
            }
            Err(err) => {
                let _ = fs::remove_file(&target.absolute);
                Err(err)
            }
        }
    }

    /// Append one line to an append-only log
    pub fn append_line(&self, requested: impl AsRef<Path>, line: &str) -> Result<CanonicalPath, ScopeError> {
        let requested = requested.as_ref();
        let target = self.capability.authorize_write(requested)?;
        let failed = |reason: String| ScopeError::WriteFailed {
            path: target.absolute.clone(),
            reason,
        };

        if let Some(parent) = target.absolute.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(format!("create parent: {e}")))?;
        }
        if is_symlink(&target.absolute) {
            return Err(ScopeError::PathForbidden {
                path: requested.to_string_lossy().into_owned(),
                violation: PathViolation::Symlink {
                    link: target.relative.clone(),
                },
            });
        }

        let mut record = line.trim_end_matches('\n').to_string();
        record.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target.absolute)
            .map_err(|e| failed(format!("open: {e}")))?;
        file.write_all(record.as_bytes())
            .map_err(|e| failed(format!("append: {e}")))?;
        Ok(target)
    }
}
