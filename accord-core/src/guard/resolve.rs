//! Containment-checked path resolution
//!
//! Requested paths are resolved against a canonical base directory one
//! component at a time. Symlinks are followed only when their target stays
//! inside the base; dangling links and not-yet-existing components are
//! followed lexically so that writes to new files can be authorised.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Symlink hop limit, matching the usual kernel `MAXSYMLINKS`
pub const MAX_SYMLINK_HOPS: usize = 40;

/// A path that resolved inside the base directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPath {
    pub absolute: PathBuf,
    /// Base-relative, `/`-separated
    pub relative: String,
    pub crossed_symlink: bool,
}

impl CanonicalPath {
    pub fn as_path(&self) -> &Path {
        &self.absolute
    }
}

/// Why a path was refused before any scope matching
#[derive(Error, Debug)]
pub enum PathViolation {
    #[error("empty path")]
    Empty,

    #[error("home-relative paths are not allowed")]
    HomeRelative,

    #[error("absolute path outside base directory")]
    AbsoluteOutsideBase,

    #[error("absolute paths are not allowed")]
    Absolute,

    #[error("path escapes base directory")]
    Escapes,

    #[error("symlink {link} points outside base directory")]
    SymlinkOutside { link: String },

    #[error("symlinks are not allowed: {link}")]
    Symlink { link: String },

    #[error("too many levels of symbolic links")]
    TooManyLinks,

    #[error("cannot inspect {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Lexically normalise `.` and `..` without touching the filesystem.
///
/// Returns `None` when `..` would climb above the root of `path`.
pub fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// Resolve `requested` inside the canonical directory `base`.
///
/// `base` must already be canonical (see [`canonical_base`]).
pub fn resolve_within(base: &Path, requested: &str) -> Result<CanonicalPath, PathViolation> {
    if requested.trim().is_empty() {
        return Err(PathViolation::Empty);
    }
    if requested.starts_with('~') {
        return Err(PathViolation::HomeRelative);
    }

    let requested_path = Path::new(requested);
    let relative_request = if requested_path.is_absolute() {
        let normalized =
            lexical_normalize(requested_path).ok_or(PathViolation::AbsoluteOutsideBase)?;
        normalized
            .strip_prefix(base)
            .map(Path::to_path_buf)
            .map_err(|_| PathViolation::AbsoluteOutsideBase)?
    } else {
        // `..` may not climb above the base at any point
        lexical_normalize(requested_path).ok_or(PathViolation::Escapes)?
    };

    let mut pending: VecDeque<OsString> = relative_request
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_os_string()),
            _ => None,
        })
        .collect();

    let mut current = base.to_path_buf();
    let mut hops = 0usize;
    let mut crossed_symlink = false;

    // `pending` only ever holds normal components; `..` was folded lexically
    while let Some(name) = pending.pop_front() {
        let candidate = current.join(&name);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(PathViolation::TooManyLinks);
                }
                let target = fs::read_link(&candidate).map_err(|source| PathViolation::Metadata {
                    path: candidate.clone(),
                    source,
                })?;
                let joined = if target.is_absolute() {
                    target.clone()
                } else {
                    current.join(&target)
                };
                let link = display_relative(base, &candidate);
                let normalized = lexical_normalize(&joined)
                    .ok_or_else(|| PathViolation::SymlinkOutside { link: link.clone() })?;
                let inside = normalized
                    .strip_prefix(base)
                    .map_err(|_| PathViolation::SymlinkOutside { link: link.clone() })?;

                debug!(link = %candidate.display(), target = %target.display(), "following symlink");
                crossed_symlink = true;

                // Re-walk the target from the base; it may contain further links
                for component in inside.components().rev() {
                    if let Component::Normal(part) = component {
                        pending.push_front(part.to_os_string());
                    }
                }
                current = base.to_path_buf();
            }
            Ok(_) => current = candidate,
            Err(err) if err.kind() == io::ErrorKind::NotFound => current = candidate,
            Err(source) => {
                // Permission and other metadata failures fail closed
                return Err(PathViolation::Metadata {
                    path: candidate,
                    source,
                });
            }
        }
    }

    let relative = display_relative(base, &current);
    Ok(CanonicalPath {
        absolute: current,
        relative,
        crossed_symlink,
    })
}

/// Resolve a material or subject path: relative only, no symlinks at all.
pub fn resolve_strict(base: &Path, requested: &str) -> Result<CanonicalPath, PathViolation> {
    if Path::new(requested).is_absolute() || requested.starts_with(['/', '\\']) {
        return Err(PathViolation::Absolute);
    }
    let resolved = resolve_within(base, requested)?;
    if resolved.crossed_symlink {
        return Err(PathViolation::Symlink {
            link: requested.to_string(),
        });
    }
    Ok(resolved)
}

/// Canonicalise a base directory once, up front
pub fn canonical_base(base: &Path) -> io::Result<PathBuf> {
    fs::canonicalize(base)
}

fn display_relative(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let canonical = canonical_base(dir.path()).unwrap();
        (dir, canonical)
    }

    #[test]
    fn test_resolves_new_file_lexically() {
        let (_dir, base) = base();
        let resolved = resolve_within(&base, "docs/./new/../note.md").unwrap();
        assert_eq!(resolved.relative, "docs/note.md");
        assert_eq!(resolved.absolute, base.join("docs/note.md"));
        assert!(!resolved.crossed_symlink);
    }

    #[test]
    fn test_rejects_home_and_empty() {
        let (_dir, base) = base();
        assert!(matches!(resolve_within(&base, "~/x"), Err(PathViolation::HomeRelative)));
        assert!(matches!(resolve_within(&base, ""), Err(PathViolation::Empty)));
    }

    #[test]
    fn test_rejects_lexical_escape() {
        let (_dir, base) = base();
        assert!(matches!(
            resolve_within(&base, "docs/../../etc/passwd"),
            Err(PathViolation::Escapes)
        ));
    }

    #[test]
    fn test_absolute_inside_base_is_allowed() {
        let (_dir, base) = base();
        let requested = base.join("a/b.md");
        let resolved = resolve_within(&base, requested.to_str().unwrap()).unwrap();
        assert_eq!(resolved.relative, "a/b.md");
        assert!(matches!(
            resolve_within(&base, "/etc/passwd"),
            Err(PathViolation::AbsoluteOutsideBase)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_outside_is_rejected() {
        use std::os::unix::fs::symlink;
        let (_dir, base) = base();
        let outside = TempDir::new().unwrap();
        symlink(outside.path(), base.join("escape")).unwrap();

        let err = resolve_within(&base, "escape/file.md").unwrap_err();
        assert!(matches!(err, PathViolation::SymlinkOutside { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_is_followed() {
        use std::os::unix::fs::symlink;
        let (_dir, base) = base();
        fs::create_dir_all(base.join("real")).unwrap();
        symlink("real", base.join("alias")).unwrap();

        let resolved = resolve_within(&base, "alias/file.md").unwrap();
        assert_eq!(resolved.relative, "real/file.md");
        assert!(resolved.crossed_symlink);
        assert!(matches!(
            resolve_strict(&base, "alias/file.md"),
            Err(PathViolation::Symlink { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_bounded() {
        use std::os::unix::fs::symlink;
        let (_dir, base) = base();
        symlink("b", base.join("a")).unwrap();
        symlink("a", base.join("b")).unwrap();
        assert!(matches!(
            resolve_within(&base, "a/x"),
            Err(PathViolation::TooManyLinks)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_followed_lexically() {
        use std::os::unix::fs::symlink;
        let (_dir, base) = base();
        symlink("/nonexistent/target", base.join("dangling")).unwrap();
        assert!(matches!(
            resolve_within(&base, "dangling"),
            Err(PathViolation::SymlinkOutside { .. })
        ));

        symlink("later.md", base.join("pending")).unwrap();
        let resolved = resolve_within(&base, "pending").unwrap();
        assert_eq!(resolved.relative, "later.md");
    }
}
