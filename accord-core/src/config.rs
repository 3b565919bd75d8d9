//! Project and global configuration
//!
//! Resolution order, later wins:
//! 1. built-in defaults
//! 2. global `<config dir>/accord/config.yml`
//! 3. project `<root>/.accord/config.yml`
//!
//! Missing files are not an error. CLI flags are applied by the caller on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

use crate::error_code::ErrorCode;

pub const PROJECT_CONFIG: &str = ".accord/config.yml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ConfigError::Read { .. } => ErrorCode::IoError,
            ConfigError::Parse { .. } => ErrorCode::SchemaInvalid,
        }
    }
}

/// Effective settings. After [`AccordConfig::load`] every path is absolute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccordConfig {
    /// Root of the shared document store; every guarded write lands under it
    pub base_dir: PathBuf,
    pub attestation_dir: PathBuf,
    pub keys_dir: PathBuf,
    pub ballot_log_dir: PathBuf,
    /// `None` disables the persistent digest cache
    pub digest_cache: Option<PathBuf>,
    pub self_verify: bool,
    /// Overrides the key fingerprint recorded in envelopes
    pub key_id: Option<String>,
    /// Charter of the acting agent; without one the operator capability applies
    pub charter: Option<PathBuf>,
}

impl Default for AccordConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            attestation_dir: PathBuf::from("attestations"),
            keys_dir: PathBuf::from(".accord/keys"),
            ballot_log_dir: PathBuf::from("bus/ballots"),
            digest_cache: Some(PathBuf::from(".accord/digest-cache.json")),
            self_verify: true,
            key_id: None,
            charter: None,
        }
    }
}

/// One config file. Absent keys leave the lower layer untouched.
#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    base_dir: Option<PathBuf>,
    attestation_dir: Option<PathBuf>,
    keys_dir: Option<PathBuf>,
    ballot_log_dir: Option<PathBuf>,
    /// `Some(None)` when the file says `digest_cache: null`
    #[serde(default, deserialize_with = "present")]
    digest_cache: Option<Option<PathBuf>>,
    self_verify: Option<bool>,
    key_id: Option<String>,
    charter: Option<PathBuf>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl ConfigLayer {
    fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "no config file");
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        let layer = serde_yaml_ng::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "loaded config layer");
        Ok(Some(layer))
    }
}

impl AccordConfig {
    /// `<config dir>/accord/config.yml` for the current platform
    pub fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "accord").map(|dirs| dirs.config_dir().join("config.yml"))
    }

    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        Self::load_from(project_root, Self::global_config_path().as_deref())
    }

    /// Layer `global` (if given) and the project file over the defaults
    pub fn load_from(project_root: &Path, global: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(layer) = global.map(ConfigLayer::read).transpose()?.flatten() {
            config.apply(layer);
        }
        if let Some(layer) = ConfigLayer::read(&project_root.join(PROJECT_CONFIG))? {
            config.apply(layer);
        }
        Ok(config.resolved(project_root))
    }

    fn apply(&mut self, layer: ConfigLayer) {
        if let Some(v) = layer.base_dir {
            self.base_dir = v;
        }
        if let Some(v) = layer.attestation_dir {
            self.attestation_dir = v;
        }
        if let Some(v) = layer.keys_dir {
            self.keys_dir = v;
        }
        if let Some(v) = layer.ballot_log_dir {
            self.ballot_log_dir = v;
        }
        if let Some(v) = layer.digest_cache {
            self.digest_cache = v;
        }
        if let Some(v) = layer.self_verify {
            self.self_verify = v;
        }
        if layer.key_id.is_some() {
            self.key_id = layer.key_id;
        }
        if layer.charter.is_some() {
            self.charter = layer.charter;
        }
    }

    /// `base_dir` is relative to the project root, everything else to `base_dir`
    fn resolved(mut self, project_root: &Path) -> Self {
        self.base_dir = if self.base_dir == Path::new(".") {
            project_root.to_path_buf()
        } else {
            project_root.join(&self.base_dir)
        };
        let base = self.base_dir.clone();
        self.attestation_dir = base.join(&self.attestation_dir);
        self.keys_dir = base.join(&self.keys_dir);
        self.ballot_log_dir = base.join(&self.ballot_log_dir);
        self.digest_cache = self.digest_cache.map(|p| base.join(p));
        self.charter = self.charter.map(|p| base.join(p));
        self
    }

    /// Default envelope location for an artifact: `<attestation_dir>/<name>.dsse.json`
    pub fn envelope_path_for(&self, artifact: &Path) -> PathBuf {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        self.attestation_dir.join(format!("{name}.dsse.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_files() {
        let root = TempDir::new().unwrap();
        let config = AccordConfig::load_from(root.path(), None).unwrap();
        assert_eq!(config.base_dir, root.path());
        assert!(config.self_verify);
        assert_eq!(config.ballot_log_dir, root.path().join("bus/ballots"));
    }

    #[test]
    fn test_project_overrides_global() {
        let root = TempDir::new().unwrap();
        let global = root.path().join("global.yml");
        fs::write(&global, "self_verify: false\nkey_id: global-key\nkeys_dir: /etc/accord/keys\n").unwrap();
        fs::create_dir_all(root.path().join(".accord")).unwrap();
        fs::write(
            root.path().join(PROJECT_CONFIG),
            "base_dir: store\nkey_id: project-key\ndigest_cache: null\n",
        )
        .unwrap();

        let config = AccordConfig::load_from(root.path(), Some(&global)).unwrap();
        assert!(!config.self_verify);
        assert_eq!(config.key_id.as_deref(), Some("project-key"));
        assert_eq!(config.base_dir, root.path().join("store"));
        assert_eq!(config.keys_dir, PathBuf::from("/etc/accord/keys"));
        assert_eq!(config.digest_cache, None);
        assert_eq!(
            config.attestation_dir,
            root.path().join("store").join("attestations")
        );
    }

    #[test]
    fn test_invalid_yaml_is_schema_error() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join(".accord")).unwrap();
        fs::write(root.path().join(PROJECT_CONFIG), "self_verify: [not, a, bool]\n").unwrap();
        let err = AccordConfig::load_from(root.path(), None).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::SchemaInvalid);
    }

    #[test]
    fn test_envelope_path_for() {
        let config = AccordConfig {
            attestation_dir: PathBuf::from("/store/attestations"),
            ..AccordConfig::default()
        };
        assert_eq!(
            config.envelope_path_for(Path::new("org/policy/p1.md")),
            PathBuf::from("/store/attestations/p1.md.dsse.json")
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial_test::serial]
    fn test_global_path_follows_xdg() {
        let dir = TempDir::new().unwrap();
        let previous = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        let path = AccordConfig::global_config_path();
        match previous {
            Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
        assert_eq!(path, Some(dir.path().join("accord").join("config.yml")));
    }
}
