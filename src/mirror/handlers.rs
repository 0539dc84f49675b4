//! One handler per event kind. Each performs a single filesystem primitive
//! against the backup tree and reports what happened; nothing here retries.
//!
//! Source-side state is re-read at call time, so a file that vanished between
//! notification and dispatch is a skip, not an error.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MirrorError, Op, Result};

/// What a rename does to the backup tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RenamePolicy {
    /// Move the live file at the new path into the backup root, unless a
    /// backup entry with the new name already exists. The file leaves the
    /// watched tree.
    #[default]
    MoveSource,
    /// Copy the renamed file's current content to its new target and drop
    /// the backup entry of the old name. The watched tree is left alone.
    Relocate,
}

/// Why a handler did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SourceMissing,
    NotAFile,
    TargetExists,
    TargetAbsent,
    /// The deletion was caused by the engine moving the file itself.
    SelfInduced,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::SourceMissing => "source no longer exists",
            SkipReason::NotAFile => "not a regular file",
            SkipReason::TargetExists => "backup entry already exists",
            SkipReason::TargetAbsent => "no backup entry",
            SkipReason::SelfInduced => "file was moved by the mirror itself",
        };
        f.write_str(reason)
    }
}

/// Result of a single handler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Copied { target: PathBuf },
    Overwritten { target: PathBuf },
    Removed { target: PathBuf },
    Moved { target: PathBuf },
    Relocated {
        target: PathBuf,
        removed: Option<PathBuf>,
    },
    Skipped(SkipReason),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Outcome::Skipped(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Copied { target } => write!(f, "backed up to {}", target.display()),
            Outcome::Overwritten { target } => {
                write!(f, "backup refreshed at {}", target.display())
            }
            Outcome::Removed { target } => write!(f, "removed {}", target.display()),
            Outcome::Moved { target } => write!(f, "moved into {}", target.display()),
            Outcome::Relocated {
                target,
                removed: Some(old),
            } => write!(f, "backed up to {} (dropped {})", target.display(), old.display()),
            Outcome::Relocated { target, removed: None } => {
                write!(f, "backed up to {}", target.display())
            }
            Outcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

/// Copy a new file into the backup tree. Never overwrites: an existing target
/// makes this a skip.
pub fn on_created(source: &Path, target: &Path, create_parents: bool) -> Result<Outcome> {
    if let Some(skip) = check_source(source)? {
        return Ok(Outcome::Skipped(skip));
    }
    if create_parents {
        ensure_parent(target)?;
    }
    copy_exclusive(source, target)
}

/// Copy a changed file into the backup tree, replacing any previous backup.
pub fn on_modified(source: &Path, target: &Path, create_parents: bool) -> Result<Outcome> {
    if let Some(skip) = check_source(source)? {
        return Ok(Outcome::Skipped(skip));
    }
    if create_parents {
        ensure_parent(target)?;
    }
    match replace_atomically(source, target, Op::Overwrite)? {
        Some(skip) => Ok(Outcome::Skipped(skip)),
        None => Ok(Outcome::Overwritten {
            target: target.to_path_buf(),
        }),
    }
}

/// Remove the backup entry of a deleted file. Absent entries are already consistent.
pub fn on_deleted(target: &Path) -> Result<Outcome> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => Ok(Outcome::Skipped(SkipReason::NotAFile)),
        Ok(_) => match fs::remove_file(target) {
            Ok(()) => Ok(Outcome::Removed {
                target: target.to_path_buf(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(Outcome::Skipped(SkipReason::TargetAbsent))
            }
            Err(e) => Err(MirrorError::io(Op::Delete, target, e)),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Outcome::Skipped(SkipReason::TargetAbsent)),
        Err(e) => Err(MirrorError::io(Op::Delete, target, e)),
    }
}

/// Rename under [`RenamePolicy::MoveSource`]: an existing entry at the new
/// target means the rename is already reflected; otherwise the live file at
/// `new_source` is moved into the backup tree.
pub fn on_renamed_move_source(
    new_source: &Path,
    new_target: &Path,
    create_parents: bool,
) -> Result<Outcome> {
    if entry_exists(new_target, Op::Move)? {
        return Ok(Outcome::Skipped(SkipReason::TargetExists));
    }
    if let Some(skip) = check_source(new_source)? {
        return Ok(Outcome::Skipped(skip));
    }
    if create_parents {
        ensure_parent(new_target)?;
    }

    match fs::rename(new_source, new_target) {
        Ok(()) => Ok(Outcome::Moved {
            target: new_target.to_path_buf(),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Ok(Outcome::Skipped(SkipReason::SourceMissing))
        }
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            match copy_exclusive(new_source, new_target)? {
                Outcome::Copied { target } => {
                    fs::remove_file(new_source)
                        .map_err(|e| MirrorError::io(Op::Move, new_source, e))?;
                    Ok(Outcome::Moved { target })
                }
                other => Ok(other),
            }
        }
        Err(e) => Err(MirrorError::io(Op::Move, new_source, e)),
    }
}

/// Rename under [`RenamePolicy::Relocate`]: refresh the backup under the new
/// name from the live file, then drop the entry kept under the old name.
pub fn on_renamed_relocate(
    new_source: &Path,
    new_target: &Path,
    old_target: &Path,
    create_parents: bool,
) -> Result<Outcome> {
    if let Some(skip) = check_source(new_source)? {
        return Ok(Outcome::Skipped(skip));
    }
    if create_parents {
        ensure_parent(new_target)?;
    }
    if let Some(skip) = replace_atomically(new_source, new_target, Op::Copy)? {
        return Ok(Outcome::Skipped(skip));
    }

    let removed = if old_target != new_target {
        match on_deleted(old_target)? {
            Outcome::Removed { target } => Some(target),
            _ => None,
        }
    } else {
        None
    };

    Ok(Outcome::Relocated {
        target: new_target.to_path_buf(),
        removed,
    })
}

fn check_source(source: &Path) -> Result<Option<SkipReason>> {
    match fs::metadata(source) {
        Ok(meta) if meta.is_file() => Ok(None),
        Ok(_) => Ok(Some(SkipReason::NotAFile)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(SkipReason::SourceMissing)),
        Err(e) => Err(MirrorError::io(Op::Copy, source, e)),
    }
}

fn entry_exists(path: &Path, op: Op) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MirrorError::io(op, path, e)),
    }
}

fn open_source(source: &Path) -> Result<Option<File>> {
    match File::open(source) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MirrorError::io(Op::Copy, source, e)),
    }
}

fn ensure_parent(target: &Path) -> Result<()> {
    match target.parent() {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(|e| MirrorError::io(Op::CreateDir, parent, e))
        }
        None => Ok(()),
    }
}

/// Copy into a freshly created `target`. `create_new` makes the no-overwrite
/// rule atomic; a partially written target is removed on failure.
fn copy_exclusive(source: &Path, target: &Path) -> Result<Outcome> {
    let Some(mut input) = open_source(source)? else {
        return Ok(Outcome::Skipped(SkipReason::SourceMissing));
    };

    let mut output = match OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Ok(Outcome::Skipped(SkipReason::TargetExists));
        }
        Err(e) => return Err(MirrorError::io(Op::Copy, target, e)),
    };

    if let Err(e) = io::copy(&mut input, &mut output) {
        drop(output);
        let _ = fs::remove_file(target);
        return Err(MirrorError::io(Op::Copy, target, e));
    }
    if let Ok(meta) = input.metadata() {
        let _ = output.set_permissions(meta.permissions());
    }

    Ok(Outcome::Copied {
        target: target.to_path_buf(),
    })
}

/// Write `source`'s bytes to a temp file beside `target`, then rename it over
/// `target`. Readers of the backup never observe a half-written file.
fn replace_atomically(source: &Path, target: &Path, op: Op) -> Result<Option<SkipReason>> {
    let dir = target
        .parent()
        .ok_or_else(|| MirrorError::malformed(format!("{} has no parent", target.display())))?;
    let Some(mut input) = open_source(source)? else {
        return Ok(Some(SkipReason::SourceMissing));
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| MirrorError::io(op, dir, e))?;
    io::copy(&mut input, tmp.as_file_mut()).map_err(|e| MirrorError::io(op, target, e))?;
    if let Ok(meta) = input.metadata() {
        let _ = tmp.as_file().set_permissions(meta.permissions());
    }
    tmp.persist(target)
        .map_err(|e| MirrorError::io(op, target, e.error))?;

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> (tempfile::TempDir, tempfile::TempDir) {
        (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap())
    }

    #[test]
    fn test_created_copies_bytes() {
        let (watch, backup) = roots();
        let source = watch.path().join("a.txt");
        let target = backup.path().join("a.txt");
        fs::write(&source, b"alpha").unwrap();

        let outcome = on_created(&source, &target, false).unwrap();
        assert_eq!(outcome, Outcome::Copied { target: target.clone() });
        assert_eq!(fs::read(&target).unwrap(), b"alpha");
    }

    #[test]
    fn test_created_never_overwrites() {
        let (watch, backup) = roots();
        let source = watch.path().join("a.txt");
        let target = backup.path().join("a.txt");
        fs::write(&source, b"new").unwrap();
        fs::write(&target, b"old").unwrap();

        let outcome = on_created(&source, &target, false).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::TargetExists));
        assert_eq!(fs::read(&target).unwrap(), b"old");
    }

    #[test]
    fn test_created_with_vanished_source_is_a_skip() {
        let (watch, backup) = roots();
        let target = backup.path().join("ghost.txt");
        let outcome = on_created(&watch.path().join("ghost.txt"), &target, false).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::SourceMissing));
        assert!(!target.exists());
    }

    #[test]
    fn test_created_skips_directories() {
        let (watch, backup) = roots();
        let dir = watch.path().join("sub");
        fs::create_dir(&dir).unwrap();
        let outcome = on_created(&dir, &backup.path().join("sub"), false).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotAFile));
    }

    #[test]
    fn test_modified_overwrites_previous_backup() {
        let (watch, backup) = roots();
        let source = watch.path().join("a.txt");
        let target = backup.path().join("a.txt");
        fs::write(&source, b"second").unwrap();
        fs::write(&target, b"first, and longer").unwrap();

        let outcome = on_modified(&source, &target, false).unwrap();
        assert_eq!(outcome, Outcome::Overwritten { target: target.clone() });
        assert_eq!(fs::read(&target).unwrap(), b"second");
        assert_eq!(fs::read_dir(backup.path()).unwrap().count(), 1, "no temp files left behind");
    }

    #[test]
    fn test_modified_with_vanished_source_keeps_backup() {
        let (watch, backup) = roots();
        let target = backup.path().join("a.txt");
        fs::write(&target, b"last good copy").unwrap();

        let outcome = on_modified(&watch.path().join("a.txt"), &target, false).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::SourceMissing));
        assert_eq!(fs::read(&target).unwrap(), b"last good copy");
        assert_eq!(fs::read_dir(backup.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_modified_creates_parents_for_nested_targets() {
        let (watch, backup) = roots();
        let source = watch.path().join("a.txt");
        let target = backup.path().join("x").join("y").join("a.txt");
        fs::write(&source, b"deep").unwrap();

        on_modified(&source, &target, true).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"deep");
    }

    #[test]
    fn test_deleted_removes_and_is_idempotent() {
        let (_watch, backup) = roots();
        let target = backup.path().join("a.txt");
        fs::write(&target, b"x").unwrap();

        assert_eq!(
            on_deleted(&target).unwrap(),
            Outcome::Removed { target: target.clone() }
        );
        assert!(!target.exists());
        assert_eq!(
            on_deleted(&target).unwrap(),
            Outcome::Skipped(SkipReason::TargetAbsent)
        );
    }

    #[test]
    fn test_deleted_leaves_directories_alone() {
        let (_watch, backup) = roots();
        let target = backup.path().join("sub");
        fs::create_dir(&target).unwrap();
        assert_eq!(
            on_deleted(&target).unwrap(),
            Outcome::Skipped(SkipReason::NotAFile)
        );
        assert!(target.is_dir());
    }

    #[test]
    fn test_move_source_rename_moves_live_file() {
        let (watch, backup) = roots();
        let new_source = watch.path().join("b.txt");
        let new_target = backup.path().join("b.txt");
        fs::write(&new_source, b"renamed").unwrap();

        let outcome = on_renamed_move_source(&new_source, &new_target, false).unwrap();
        assert_eq!(outcome, Outcome::Moved { target: new_target.clone() });
        assert!(!new_source.exists());
        assert_eq!(fs::read(&new_target).unwrap(), b"renamed");
    }

    #[test]
    fn test_move_source_rename_noop_when_target_exists() {
        let (watch, backup) = roots();
        let new_source = watch.path().join("b.txt");
        let new_target = backup.path().join("b.txt");
        fs::write(&new_source, b"live").unwrap();
        fs::write(&new_target, b"kept").unwrap();

        let outcome = on_renamed_move_source(&new_source, &new_target, false).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::TargetExists));
        assert_eq!(fs::read(&new_source).unwrap(), b"live");
        assert_eq!(fs::read(&new_target).unwrap(), b"kept");
    }

    #[test]
    fn test_move_source_rename_with_vanished_source_is_a_skip() {
        let (watch, backup) = roots();
        let new_target = backup.path().join("b.txt");

        let outcome =
            on_renamed_move_source(&watch.path().join("b.txt"), &new_target, false).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::SourceMissing));
        assert!(!new_target.exists());
    }

    #[test]
    fn test_relocate_rename_with_vanished_source_keeps_old_entry() {
        let (watch, backup) = roots();
        let new_target = backup.path().join("b.txt");
        let old_target = backup.path().join("a.txt");
        fs::write(&old_target, b"previous").unwrap();

        let outcome =
            on_renamed_relocate(&watch.path().join("b.txt"), &new_target, &old_target, false)
                .unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::SourceMissing));
        assert!(!new_target.exists());
        assert_eq!(fs::read(&old_target).unwrap(), b"previous");
    }

    #[test]
    fn test_relocate_rename_keeps_source_and_drops_old_entry() {
        let (watch, backup) = roots();
        let new_source = watch.path().join("b.txt");
        let new_target = backup.path().join("b.txt");
        let old_target = backup.path().join("a.txt");
        fs::write(&new_source, b"content").unwrap();
        fs::write(&old_target, b"content").unwrap();

        let outcome = on_renamed_relocate(&new_source, &new_target, &old_target, false).unwrap();
        assert_eq!(
            outcome,
            Outcome::Relocated {
                target: new_target.clone(),
                removed: Some(old_target.clone()),
            }
        );
        assert!(new_source.exists());
        assert!(!old_target.exists());
        assert_eq!(fs::read(&new_target).unwrap(), b"content");
    }

    #[test]
    fn test_relocate_rename_within_same_target_keeps_entry() {
        let (watch, backup) = roots();
        let new_source = watch.path().join("moved").join("a.txt");
        fs::create_dir(watch.path().join("moved")).unwrap();
        fs::write(&new_source, b"v2").unwrap();
        let target = backup.path().join("a.txt");
        fs::write(&target, b"v1").unwrap();

        let outcome = on_renamed_relocate(&new_source, &target, &target, false).unwrap();
        assert_eq!(
            outcome,
            Outcome::Relocated {
                target: target.clone(),
                removed: None,
            }
        );
        assert_eq!(fs::read(&target).unwrap(), b"v2");
    }

    #[test]
    fn test_copy_into_missing_backup_dir_is_an_error() {
        let (watch, backup) = roots();
        let source = watch.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        let target = backup.path().join("missing").join("a.txt");

        let err = on_created(&source, &target, false).unwrap_err();
        assert!(matches!(err, MirrorError::Io { op: Op::Copy, .. }));
    }
}
