//! Material resolution and digest checks
//!
//! Local materials follow the same containment rules as guarded writes but
//! are stricter: no absolute paths and no symlinks anywhere on the way.

use std::path::Path;
use tracing::debug;

use super::cache::DigestCache;
use super::digest::{hash_file_stable, SHA256};
use super::error::{CanonicalError, MaterialIssue, MaterialIssueKind};
use super::statement::Material;
use crate::guard::resolve::{canonical_base, resolve_strict};

/// Compute or check the digest of one material, returning the actual digest
fn check_one(
    material: &Material,
    base: &Path,
    cache: &mut Option<&mut DigestCache>,
) -> Result<String, MaterialIssue> {
    let name = material.name.as_str();
    let issue = |kind| MaterialIssue::new(name, kind);

    if name.is_empty() {
        return Err(issue(MaterialIssueKind::MissingName));
    }

    if material.is_remote() {
        return material
            .sha256()
            .map(str::to_lowercase)
            .ok_or_else(|| issue(MaterialIssueKind::RemoteWithoutDigest));
    }

    let resolved = resolve_strict(base, name)
        .map_err(|violation| issue(MaterialIssueKind::Forbidden(violation.to_string())))?;
    if !resolved.absolute.is_file() {
        return Err(issue(MaterialIssueKind::NotFound));
    }

    let hashed = match cache.as_deref_mut() {
        Some(cache) => cache.digest(&resolved.absolute),
        None => hash_file_stable(&resolved.absolute),
    };
    let actual = hashed.map_err(|err| match err {
        CanonicalError::HashRace { .. } => issue(MaterialIssueKind::HashRace),
        _ => issue(MaterialIssueKind::NotFound),
    })?;

    if let Some(expected) = material.sha256() {
        if expected.to_lowercase() != actual {
            return Err(issue(MaterialIssueKind::DigestMismatch {
                expected: expected.to_string(),
                actual,
            }));
        }
    }
    Ok(actual)
}

fn canonical(base: &Path) -> Result<std::path::PathBuf, CanonicalError> {
    canonical_base(base).map_err(|source| CanonicalError::Io {
        path: base.to_path_buf(),
        source,
    })
}

/// Fill missing digests and check declared ones against disk
pub fn resolve_materials(
    materials: &mut [Material],
    base: &Path,
    mut cache: Option<&mut DigestCache>,
) -> Result<(), CanonicalError> {
    if materials.is_empty() {
        return Ok(());
    }
    let base = canonical(base)?;
    let mut issues = Vec::new();

    for material in materials.iter_mut() {
        match check_one(material, &base, &mut cache) {
            Ok(actual) => {
                material.digest.insert(SHA256.to_string(), actual);
            }
            Err(issue) => issues.push(issue),
        }
    }

    if issues.is_empty() {
        debug!(count = materials.len(), "materials resolved");
        Ok(())
    } else {
        Err(CanonicalError::Materials { issues })
    }
}

/// Re-check already-signed material digests without modifying them
pub fn check_materials(materials: &[Material], base: &Path) -> Result<(), CanonicalError> {
    if materials.is_empty() {
        return Ok(());
    }
    let base = canonical(base)?;
    let mut issues = Vec::new();

    for material in materials {
        if !material.is_remote() && material.sha256().is_none() && !material.name.is_empty() {
            issues.push(MaterialIssue::new(
                material.name.as_str(),
                MaterialIssueKind::DigestMismatch {
                    expected: String::new(),
                    actual: "unrecorded".to_string(),
                },
            ));
            continue;
        }
        if let Err(issue) = check_one(material, &base, &mut None) {
            issues.push(issue);
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(CanonicalError::Materials { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::digest::sha256_hex;
    use crate::ErrorCode;
    use std::fs;
    use tempfile::TempDir;

    fn material(name: &str, sha: Option<&str>) -> Material {
        let mut m = Material::new(name);
        if let Some(sha) = sha {
            m.digest.insert(SHA256.to_string(), sha.to_string());
        }
        m
    }

    #[test]
    fn test_fills_missing_digest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in.md"), "input").unwrap();

        let mut materials = vec![material("in.md", None)];
        resolve_materials(&mut materials, dir.path(), None).unwrap();
        assert_eq!(materials[0].sha256(), Some(sha256_hex(b"input").as_str()));
        check_materials(&materials, dir.path()).unwrap();
    }

    #[test]
    fn test_mismatch_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in.md"), "input").unwrap();

        let mut materials = vec![material("in.md", Some(&"0".repeat(64)))];
        let err = resolve_materials(&mut materials, dir.path(), None).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::DigestMismatch);
        assert!(err.messages()[0].contains("materials digest mismatch for in.md"));
    }

    #[test]
    fn test_forbidden_paths() {
        let dir = TempDir::new().unwrap();
        for name in ["~/x", "/etc/passwd", "../x"] {
            let mut materials = vec![material(name, None)];
            let err = resolve_materials(&mut materials, dir.path(), None).unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::PathForbidden, "{name}");
        }
    }

    #[test]
    fn test_remote_requires_digest() {
        let dir = TempDir::new().unwrap();
        let mut materials = vec![material("https://example.org/spec", None)];
        let err = resolve_materials(&mut materials, dir.path(), None).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::MalformedMetadata);

        let mut materials = vec![material("https://example.org/spec", Some(&"a".repeat(64)))];
        resolve_materials(&mut materials, dir.path(), None).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut materials = vec![material("gone.md", None)];
        let err = resolve_materials(&mut materials, dir.path(), None).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::DigestMismatch);
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_material_rejected() {
        use std::os::unix::fs::symlink;
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.md"), "x").unwrap();
        symlink("real.md", dir.path().join("link.md")).unwrap();

        let mut materials = vec![material("link.md", None)];
        let err = resolve_materials(&mut materials, dir.path(), None).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::PathForbidden);
    }

    #[test]
    fn test_uses_cache() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in.md"), "input").unwrap();
        let mut cache = DigestCache::in_memory();
        let mut materials = vec![material("in.md", None)];
        resolve_materials(&mut materials, dir.path(), Some(&mut cache)).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
