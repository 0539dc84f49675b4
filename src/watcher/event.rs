use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of change reported for a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Created => "created",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Renamed => "renamed",
        };
        f.write_str(name)
    }
}

/// A classified filesystem change, consumed exactly once by the mirror engine.
///
/// `previous_path` is only meaningful for [`EventKind::Renamed`], where it holds the
/// path the file had before the rename and `source_path` holds the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub source_path: PathBuf,
    pub previous_path: Option<PathBuf>,
}

impl WatchedEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::single(EventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::single(EventKind::Modified, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::single(EventKind::Deleted, path)
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Renamed,
            source_path: to.into(),
            previous_path: Some(from.into()),
        }
    }

    fn single(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source_path: path.into(),
            previous_path: None,
        }
    }

    /// The path the event is about: the new path for renames, the only path otherwise.
    pub fn path(&self) -> &Path {
        &self.source_path
    }
}

impl fmt::Display for WatchedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.previous_path {
            Some(from) => write!(
                f,
                "{} {} -> {}",
                self.kind,
                from.display(),
                self.source_path.display()
            ),
            None => write!(f, "{} {}", self.kind, self.source_path.display()),
        }
    }
}
