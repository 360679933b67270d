//! Link rules: the immutable binding between a watched source tree and the
//! mirror tree that shadows it.

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::info;

use crate::error::{LinkError, Result};
use crate::translate::normalize;

/// Filesystem event categories a rule can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Create,
    Delete,
    Move,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Create, EventKind::Delete, EventKind::Move];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::Move => "move",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event kind '{0}', expected one of: create, delete, move")]
pub struct ParseEventKindError(pub String);

impl FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(EventKind::Create),
            "delete" => Ok(EventKind::Delete),
            "move" => Ok(EventKind::Move),
            _ => Err(ParseEventKindError(raw.to_string())),
        }
    }
}

/// Set of event kinds enabled for a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMask {
    kinds: BTreeSet<EventKind>,
}

impl EventMask {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        EventKind::ALL.into_iter().collect()
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn insert(&mut self, kind: EventKind) -> bool {
        self.kinds.insert(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.kinds.iter().copied()
    }
}

impl FromIterator<EventKind> for EventMask {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kinds.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(EventKind::as_str).collect();
        f.write_str(&names.join("|"))
    }
}

/// A validated source → mirror binding.
///
/// Both roots are stored canonicalized. The source root must already exist
/// as a directory; the mirror root is created when absent. The two roots may
/// not be equal or nested inside each other, and on Unix they must live on
/// the same device since hardlinks cannot cross filesystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRule {
    source_root: PathBuf,
    mirror_root: PathBuf,
    recursive: bool,
    events: EventMask,
}

impl LinkRule {
    pub fn new(
        source_root: impl AsRef<Path>,
        mirror_root: impl AsRef<Path>,
        recursive: bool,
        events: EventMask,
    ) -> Result<Self> {
        let source = absolutize(source_root.as_ref());
        let mirror = absolutize(mirror_root.as_ref());

        if !source.exists() {
            return Err(LinkError::SourceMissing(source));
        }
        if !source.is_dir() {
            return Err(LinkError::SourceNotDirectory(source));
        }
        if mirror.exists() && !mirror.is_dir() {
            return Err(LinkError::MirrorNotDirectory(mirror));
        }

        // Reject bad pairs before anything is created on disk.
        check_roots(&resolve_root(&source), &resolve_root(&mirror))?;

        if !mirror.exists() {
            info!(mirror = %mirror.display(), "mirror root doesn't exist, creating it");
            fs::create_dir_all(&mirror)
                .map_err(|err| LinkError::io("create mirror root", &mirror, err))?;
        }

        let source_root = fs::canonicalize(&source)
            .map_err(|err| LinkError::io("resolve source root", &source, err))?;
        let mirror_root = fs::canonicalize(&mirror)
            .map_err(|err| LinkError::io("resolve mirror root", &mirror, err))?;
        check_roots(&source_root, &mirror_root)?;

        ensure_same_device(&source_root, &mirror_root)?;

        Ok(Self {
            source_root,
            mirror_root,
            recursive,
            events,
        })
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn events(&self) -> &EventMask {
        &self.events
    }

    /// Returns the first root of `self` that equals, contains or is contained
    /// by a root of `other`.
    pub fn overlap_with(&self, other: &LinkRule) -> Option<&Path> {
        let ours = [self.source_root.as_path(), self.mirror_root.as_path()];
        let theirs = [other.source_root.as_path(), other.mirror_root.as_path()];
        ours.into_iter()
            .find(|mine| theirs.iter().any(|other| nested(mine, other)))
    }
}

impl fmt::Display for LinkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (events: {}, recursive: {})",
            self.source_root.display(),
            self.mirror_root.display(),
            self.events,
            self.recursive
        )
    }
}

/// Whether one of the two paths equals or contains the other.
pub fn roots_overlap(a: &Path, b: &Path) -> bool {
    nested(a, b)
}

/// Absolute form of `path` with symlinks resolved through its longest
/// existing prefix. Components past that prefix are kept as written, so the
/// result is comparable with canonical roots before the path is created.
pub fn resolve_root(path: impl AsRef<Path>) -> PathBuf {
    let path = normalize(&absolutize(path.as_ref()));
    let mut existing = path.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(real, |resolved: PathBuf, part| resolved.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    path
}

fn check_roots(source_root: &Path, mirror_root: &Path) -> Result<()> {
    if source_root == mirror_root {
        return Err(LinkError::SameRoot(source_root.to_path_buf()));
    }
    if nested(source_root, mirror_root) {
        return Err(LinkError::NestedRoots {
            source_root: source_root.to_path_buf(),
            mirror_root: mirror_root.to_path_buf(),
        });
    }
    Ok(())
}

fn nested(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.join(path)
}

#[cfg(unix)]
fn ensure_same_device(source_root: &Path, mirror_root: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let source_dev = fs::metadata(source_root)
        .map_err(|err| LinkError::io("stat source root", source_root, err))?
        .dev();
    let mirror_dev = fs::metadata(mirror_root)
        .map_err(|err| LinkError::io("stat mirror root", mirror_root, err))?
        .dev();

    if source_dev != mirror_dev {
        return Err(LinkError::CrossDevice {
            source_path: source_root.to_path_buf(),
            mirror_path: mirror_root.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_same_device(_source_root: &Path, _mirror_root: &Path) -> Result<()> {
    Ok(())
}
