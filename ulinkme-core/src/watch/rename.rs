//! Pairing of rename halves.
//!
//! Backends report a rename as a "from" half and a "to" half sharing a
//! tracker. When both ends are inside the watched tree the halves pair up
//! into a move. A "from" with no matching "to" means the entry left the tree
//! and is mirrored as a delete; a "to" with no matching "from" means the
//! entry arrived from outside and is mirrored as a create.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::source::WatchMessage;
use crate::event::RawEvent;

/// Work produced for a rule's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Apply(RawEvent),
    /// A directory moved into a recursive rule; its contents never produced
    /// events of their own.
    Populate(PathBuf),
    Report(String),
}

#[derive(Debug)]
pub(crate) struct RenamePairer {
    recursive: bool,
    pending: Option<(Option<usize>, PathBuf)>,
    paired: Option<(PathBuf, PathBuf)>,
}

impl RenamePairer {
    pub(crate) fn new(recursive: bool) -> Self {
        Self {
            recursive,
            pending: None,
            paired: None,
        }
    }

    /// True while a "from" half waits for its partner.
    pub(crate) fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Give up on the pending "from" half: the entry left the tree.
    pub(crate) fn flush(&mut self) -> Option<Step> {
        let (_, path) = self.pending.take()?;
        debug!(path = %path.display(), "moved out of the watched tree");
        Some(Step::Apply(RawEvent::Deleted {
            path,
            is_dir: false,
        }))
    }

    pub(crate) fn feed(&mut self, message: WatchMessage) -> Vec<Step> {
        let paired = self.paired.take();
        let mut steps = Vec::new();
        match message {
            WatchMessage::RenameFrom { tracker, path } => {
                steps.extend(self.flush());
                self.pending = Some((tracker, path));
            }
            WatchMessage::RenameTo {
                tracker,
                path,
                is_dir,
            } => match self.pending.take() {
                Some((pending, old_path)) if pending.is_some() && pending == tracker => {
                    self.paired = Some((old_path.clone(), path.clone()));
                    steps.push(Step::Apply(RawEvent::Moved {
                        old_path,
                        new_path: path,
                        is_dir,
                    }));
                }
                unmatched => {
                    self.pending = unmatched;
                    steps.extend(self.flush());
                    debug!(path = %path.display(), "moved into the watched tree");
                    steps.push(Step::Apply(RawEvent::Created {
                        path: path.clone(),
                        is_dir,
                    }));
                    if is_dir && self.recursive {
                        steps.push(Step::Populate(path));
                    }
                }
            },
            WatchMessage::Event(RawEvent::Moved {
                old_path,
                new_path,
                is_dir,
            }) => {
                if paired.is_some_and(|(old, new)| old == old_path && new == new_path) {
                    return steps;
                }
                if self
                    .pending
                    .as_ref()
                    .is_some_and(|(_, pending)| *pending == old_path)
                {
                    self.pending = None;
                } else {
                    steps.extend(self.flush());
                }
                steps.push(Step::Apply(RawEvent::Moved {
                    old_path,
                    new_path,
                    is_dir,
                }));
            }
            WatchMessage::Event(event) => {
                steps.extend(self.flush());
                steps.push(Step::Apply(event));
            }
            WatchMessage::Error(message) => {
                steps.extend(self.flush());
                steps.push(Step::Report(message));
            }
        }
        steps
    }
}

/// Create events for everything below `dir`, parents before children.
pub(crate) fn expand_moved_in(dir: &Path) -> Vec<RawEvent> {
    let mut events = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        match entry {
            Ok(entry) => {
                let is_dir = entry.file_type().is_dir();
                events.push(RawEvent::Created {
                    path: entry.into_path(),
                    is_dir,
                });
            }
            Err(err) => warn!(dir = %dir.display(), "failed to walk moved-in directory: {err}"),
        }
    }
    events
}
