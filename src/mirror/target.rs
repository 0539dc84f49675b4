use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{MirrorError, Result};

/// How source paths map onto the backup root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TargetLayout {
    /// Every file lands directly under the backup root, keyed by file name only.
    /// Same-named files from different subdirectories share one target.
    #[default]
    Flat,
    /// The path relative to the watch root is preserved under the backup root.
    Nested,
}

/// Computes mirror targets for source paths.
#[derive(Debug, Clone)]
pub struct MirrorTargets {
    watch_root: PathBuf,
    backup_root: PathBuf,
    layout: TargetLayout,
}

impl MirrorTargets {
    pub fn new(
        watch_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        layout: TargetLayout,
    ) -> Self {
        Self {
            watch_root: watch_root.into(),
            backup_root: backup_root.into(),
            layout,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn layout(&self) -> TargetLayout {
        self.layout
    }

    /// Backup-side path for `source`.
    pub fn resolve(&self, source: &Path) -> Result<PathBuf> {
        match self.layout {
            TargetLayout::Flat => {
                let name = source.file_name().ok_or_else(|| {
                    MirrorError::malformed(format!("{} has no file name", source.display()))
                })?;
                Ok(self.backup_root.join(name))
            }
            TargetLayout::Nested => {
                let relative = source.strip_prefix(&self.watch_root).map_err(|_| {
                    MirrorError::malformed(format!(
                        "{} is outside the watch root {}",
                        source.display(),
                        self.watch_root.display()
                    ))
                })?;
                let clean = relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)));
                if relative.as_os_str().is_empty() || !clean {
                    return Err(MirrorError::malformed(format!(
                        "{} does not name an entry inside the watch root",
                        source.display()
                    )));
                }
                Ok(self.backup_root.join(relative))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_layout_uses_file_name_only() {
        let targets = MirrorTargets::new("/watch", "/backup", TargetLayout::Flat);
        assert_eq!(
            targets.resolve(Path::new("/watch/a/b/report.final.txt")).unwrap(),
            PathBuf::from("/backup/report.final.txt")
        );
        assert_eq!(
            targets.resolve(Path::new("/watch/Makefile")).unwrap(),
            PathBuf::from("/backup/Makefile")
        );
    }

    #[test]
    fn test_flat_layout_collides_across_subdirectories() {
        let targets = MirrorTargets::new("/watch", "/backup", TargetLayout::Flat);
        let a = targets.resolve(Path::new("/watch/x/notes.md")).unwrap();
        let b = targets.resolve(Path::new("/watch/y/notes.md")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flat_layout_rejects_path_without_file_name() {
        let targets = MirrorTargets::new("/watch", "/backup", TargetLayout::Flat);
        let err = targets.resolve(Path::new("/watch/..")).unwrap_err();
        assert!(matches!(err, MirrorError::Malformed { .. }));
    }

    #[test]
    fn test_nested_layout_keeps_relative_structure() {
        let targets = MirrorTargets::new("/watch", "/backup", TargetLayout::Nested);
        assert_eq!(
            targets.resolve(Path::new("/watch/x/notes.md")).unwrap(),
            PathBuf::from("/backup/x/notes.md")
        );
    }

    #[test]
    fn test_nested_layout_rejects_outside_and_root() {
        let targets = MirrorTargets::new("/watch", "/backup", TargetLayout::Nested);
        assert!(targets.resolve(Path::new("/elsewhere/notes.md")).is_err());
        assert!(targets.resolve(Path::new("/watch")).is_err());
    }
}
