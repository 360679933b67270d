//! Typed filesystem events and the handler capability that consumes them.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::rule::EventKind;

/// A filesystem change observed under a watched root, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Created {
        path: PathBuf,
        is_dir: bool,
    },
    Deleted {
        path: PathBuf,
        is_dir: bool,
    },
    Moved {
        old_path: PathBuf,
        new_path: PathBuf,
        is_dir: bool,
    },
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RawEvent::Created { .. } => EventKind::Create,
            RawEvent::Deleted { .. } => EventKind::Delete,
            RawEvent::Moved { .. } => EventKind::Move,
        }
    }

    /// The path the event is about; the destination for moves.
    pub fn path(&self) -> &Path {
        match self {
            RawEvent::Created { path, .. } | RawEvent::Deleted { path, .. } => path,
            RawEvent::Moved { new_path, .. } => new_path,
        }
    }

    pub fn is_dir(&self) -> bool {
        match self {
            RawEvent::Created { is_dir, .. }
            | RawEvent::Deleted { is_dir, .. }
            | RawEvent::Moved { is_dir, .. } => *is_dir,
        }
    }

    /// Route the event to the matching handler method.
    pub fn dispatch_to<H: EventHandler + ?Sized>(&self, handler: &H) -> Result<Applied> {
        match self {
            RawEvent::Created { path, is_dir } => handler.on_created(path, *is_dir),
            RawEvent::Deleted { path, is_dir } => handler.on_deleted(path, *is_dir),
            RawEvent::Moved {
                old_path,
                new_path,
                is_dir,
            } => handler.on_moved(old_path, new_path, *is_dir),
        }
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = if self.is_dir() { "dir" } else { "file" };
        match self {
            RawEvent::Created { path, .. } => write!(f, "created {entry} {}", path.display()),
            RawEvent::Deleted { path, .. } => write!(f, "deleted {entry} {}", path.display()),
            RawEvent::Moved {
                old_path, new_path, ..
            } => write!(
                f,
                "moved {entry} {} -> {}",
                old_path.display(),
                new_path.display()
            ),
        }
    }
}

/// Why an event produced no mirror-side change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Create target already present in the mirror (no-clobber).
    AlreadyExists,
    /// Delete/move source already absent from the mirror.
    AlreadyAbsent,
    /// A move endpoint lies outside the watched root.
    OutsideRoot,
    /// The event targets the root itself.
    Root,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::AlreadyExists => "already exists",
            SkipReason::AlreadyAbsent => "already absent",
            SkipReason::OutsideRoot => "outside watched root",
            SkipReason::Root => "watched root itself",
        })
    }
}

/// Mirror-side effect of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    DirCreated(PathBuf),
    Linked(PathBuf),
    DirRemoved(PathBuf),
    Unlinked(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    Skipped(SkipReason),
    /// The event type is disabled for this rule.
    Masked,
}

impl Applied {
    /// Whether the mirror tree was changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Skipped(_) | Applied::Masked)
    }
}

/// Narrow capability invoked by the watch pipeline for each event.
#[cfg_attr(test, mockall::automock)]
pub trait EventHandler: Send + Sync {
    fn on_created(&self, path: &Path, is_dir: bool) -> Result<Applied>;

    fn on_deleted(&self, path: &Path, is_dir: bool) -> Result<Applied>;

    fn on_moved(&self, old_path: &Path, new_path: &Path, is_dir: bool) -> Result<Applied>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_routes_by_variant() {
        let mut handler = MockEventHandler::new();
        handler
            .expect_on_moved()
            .withf(|old, new, is_dir| {
                old == Path::new("/s/a") && new == Path::new("/s/b") && !*is_dir
            })
            .times(1)
            .returning(|old, new, _| {
                Ok(Applied::Renamed {
                    from: old.to_path_buf(),
                    to: new.to_path_buf(),
                })
            });
        handler.expect_on_created().never();
        handler.expect_on_deleted().never();

        let event = RawEvent::Moved {
            old_path: "/s/a".into(),
            new_path: "/s/b".into(),
            is_dir: false,
        };
        let applied = event.dispatch_to(&handler).unwrap();
        assert!(applied.changed());
        assert_eq!(event.kind(), EventKind::Move);
        assert_eq!(event.path(), Path::new("/s/b"));
    }

    #[test]
    fn display_names_entry_type() {
        let event = RawEvent::Deleted {
            path: "/s/d".into(),
            is_dir: true,
        };
        assert_eq!(event.to_string(), "deleted dir /s/d");
        assert!(!Applied::Skipped(SkipReason::AlreadyAbsent).changed());
        assert!(!Applied::Masked.changed());
    }
}
