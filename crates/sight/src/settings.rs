//! Runtime settings
//!
//! Layered with figment, later layers win:
//!
//! 1. Built-in defaults
//! 2. `sight.toml` (or the file given on the command line)
//! 3. Environment variables prefixed `SIGHT_`, nested with `__`
//!    (e.g. `SIGHT_MEMORY__POLICY=barrier`)

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use sight_data::memory::PolicyKind;

use crate::error::{Error, Result};

/// Settings file looked up when none is given
pub const DEFAULT_SETTINGS_FILE: &str = "sight.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "SIGHT_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directories scanned for module descriptors
    pub module_paths: Vec<PathBuf>,
    /// Wildcard patterns of modules started at launch
    pub autostart: Vec<String>,
    /// Named workers spawned up front
    pub workers: Vec<String>,
    pub memory: MemorySettings,
    /// App instruction file launched after the modules
    pub app: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            module_paths: vec![PathBuf::from("modules")],
            autostart: vec![crate::services::CORE_MODULE.to_string()],
            workers: Vec::new(),
            memory: MemorySettings::default(),
            app: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub policy: PolicyKind,
    /// Resident bytes above which the barrier policy dumps
    pub barrier_bytes: usize,
    /// Where dumped buffers go; the system temp dir when unset
    pub dump_dir: Option<PathBuf>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Never,
            barrier_bytes: 256 * 1024 * 1024,
            dump_dir: None,
        }
    }
}

impl Settings {
    /// The layered provider, before extraction
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load settings. An explicit `file` must exist; the default one may not.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let path = match file {
            Some(path) if !path.exists() => {
                return Err(Error::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_SETTINGS_FILE),
        };

        let settings: Settings = Self::figment(&path).extract()?;
        tracing::debug!(file = %path.display(), ?settings, "Settings loaded");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.autostart, vec!["sight.core"]);
        assert_eq!(settings.memory.policy, PolicyKind::Never);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("sight.toml");
        std::fs::write(
            &file,
            r#"
                module_paths = ["/opt/sight/modules"]
                workers = ["io", "render"]

                [memory]
                policy = "barrier"
                barrier_bytes = 1024
            "#,
        )
        .unwrap();

        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(&file))
            .extract()
            .unwrap();

        assert_eq!(settings.module_paths, vec![PathBuf::from("/opt/sight/modules")]);
        assert_eq!(settings.workers, vec!["io", "render"]);
        assert_eq!(settings.memory.policy, PolicyKind::Barrier);
        assert_eq!(settings.memory.barrier_bytes, 1024);
        assert_eq!(settings.autostart, vec!["sight.core"]);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/definitely/not/sight.toml"))).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
