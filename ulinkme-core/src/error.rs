use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("source root {0} not found")]
    SourceMissing(PathBuf),

    #[error("source root {0} is not a directory")]
    SourceNotDirectory(PathBuf),

    #[error("mirror root {0} exists but is not a directory")]
    MirrorNotDirectory(PathBuf),

    #[error("source and mirror roots are the same directory: {0}")]
    SameRoot(PathBuf),

    #[error("source root {source_root} and mirror root {mirror_root} are nested inside each other")]
    NestedRoots {
        source_root: PathBuf,
        mirror_root: PathBuf,
    },

    #[error("root {path} overlaps with already registered rule {existing}")]
    RuleOverlap { path: PathBuf, existing: PathBuf },

    #[error("{path} is outside of root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("unsupported: cross-device link from {source_path} to {mirror_path}")]
    CrossDevice {
        source_path: PathBuf,
        mirror_path: PathBuf,
    },

    #[error("unsupported: cross-device rename from {from} to {to}")]
    CrossDeviceRename { from: PathBuf, to: PathBuf },

    #[error("refusing to remove non-empty mirror directory {0}")]
    DirectoryNotEmpty(PathBuf),

    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LinkError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        LinkError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Errors that must stay visible instead of being folded into routine
    /// per-event warnings.
    pub fn is_loud(&self) -> bool {
        matches!(self, LinkError::DirectoryNotEmpty(_))
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
