use std::fmt;
use std::path::PathBuf;

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Filesystem primitive a handler was running when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Copy,
    Overwrite,
    Delete,
    Move,
    CreateDir,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Copy => "copy",
            Op::Overwrite => "overwrite",
            Op::Delete => "delete",
            Op::Move => "move",
            Op::CreateDir => "create directory",
        };
        f.write_str(name)
    }
}

/// Errors a single handler can report. None of them is fatal to the engine.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("{op} failed at {path}: {source}")]
    Io {
        op: Op,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed event: {reason}")]
    Malformed { reason: String },
}

impl MirrorError {
    pub fn io(op: Op, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
