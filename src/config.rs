use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::mirror::handlers::RenamePolicy;
use crate::mirror::target::TargetLayout;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "backup-mirror.toml";

/// Default capacity of the channel between the watcher and the engine.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Configuration loaded from `backup-mirror.toml`. Every field is optional;
/// command-line flags take precedence.
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Glob patterns for paths that are never mirrored (e.g. `*.swp`).
    pub exclude: Option<Vec<String>>,
    pub rename: Option<RenamePolicy>,
    pub layout: Option<TargetLayout>,
    /// Serialize handlers that touch the same mirror target.
    pub serialize_per_path: Option<bool>,
    pub queue_capacity: Option<usize>,
}

impl MirrorConfig {
    /// Load configuration from `path`.
    ///
    /// Returns a default (empty) configuration if the file does not exist or cannot be parsed.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config, using defaults"
                );
                Self::default()
            }
        }
    }
}

/// Fully resolved settings the core runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorSettings {
    pub watch_root: PathBuf,
    pub backup_root: PathBuf,
    pub layout: TargetLayout,
    pub rename: RenamePolicy,
    pub serialize_per_path: bool,
    pub exclude: Vec<String>,
    pub queue_capacity: usize,
}

impl MirrorSettings {
    /// Defaults for the given roots: flat layout, move-source renames, no serialization.
    pub fn new(watch_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            watch_root: watch_root.into(),
            backup_root: backup_root.into(),
            layout: TargetLayout::default(),
            rename: RenamePolicy::default(),
            serialize_per_path: false,
            exclude: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Fill in anything the file configures.
    pub fn with_config(mut self, config: MirrorConfig) -> Self {
        if let Some(layout) = config.layout {
            self.layout = layout;
        }
        if let Some(rename) = config.rename {
            self.rename = rename;
        }
        if let Some(serialize) = config.serialize_per_path {
            self.serialize_per_path = serialize;
        }
        if let Some(exclude) = config.exclude {
            self.exclude = exclude;
        }
        if let Some(capacity) = config.queue_capacity {
            self.queue_capacity = capacity.max(1);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(MirrorConfig::load(&dir.path().join(CONFIG_FILE)), MirrorConfig::default());
    }

    #[test]
    fn test_parses_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
exclude = ["*.swp", "*~"]
rename = "relocate"
layout = "nested"
serialize_per_path = true
queue_capacity = 32
"#,
        )
        .unwrap();

        let config = MirrorConfig::load(&path);
        assert_eq!(config.rename, Some(RenamePolicy::Relocate));
        assert_eq!(config.layout, Some(TargetLayout::Nested));

        let settings = MirrorSettings::new("/w", "/b").with_config(config);
        assert!(settings.serialize_per_path);
        assert_eq!(settings.queue_capacity, 32);
        assert_eq!(settings.exclude, vec!["*.swp".to_string(), "*~".to_string()]);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "rename = \"teleport\"\n").unwrap();
        assert_eq!(MirrorConfig::load(&path), MirrorConfig::default());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let config = MirrorConfig {
            queue_capacity: Some(0),
            ..Default::default()
        };
        assert_eq!(MirrorSettings::new("/w", "/b").with_config(config).queue_capacity, 1);
    }
}
