//! Per-rule reactor that replays source events as mirror-side operations.
//!
//! The reactor never reads file contents; only pathname topology drives it.
//! Every handler is a no-op (returning [`Applied::Masked`]) when its event
//! kind is disabled in the rule's mask.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{Span, debug, info, info_span};

use crate::error::{LinkError, Result};
use crate::event::{Applied, EventHandler, SkipReason};
use crate::rule::{EventKind, EventMask, LinkRule};
use crate::translate::{PathTranslator, ensure_parent_dirs};

#[derive(Debug, Clone)]
pub struct MirrorReactor {
    translator: PathTranslator,
    events: EventMask,
    span: Span,
}

impl MirrorReactor {
    pub fn new(rule: &LinkRule) -> Self {
        let span = info_span!(
            "link",
            source = %rule.source_root().display(),
            mirror = %rule.mirror_root().display(),
        );
        Self::with_span(rule, span)
    }

    /// Build a reactor that logs inside the supplied span.
    pub fn with_span(rule: &LinkRule, span: Span) -> Self {
        Self {
            translator: PathTranslator::new(rule),
            events: rule.events().clone(),
            span,
        }
    }

    pub fn source_root(&self) -> &Path {
        self.translator.source_root()
    }

    pub fn mirror_root(&self) -> &Path {
        self.translator.mirror_root()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn enabled(&self, kind: EventKind) -> bool {
        self.events.contains(kind)
    }

    /// Mirror path for `path`, or `None` when `path` is the source root.
    fn mirror_path(&self, path: &Path) -> Result<Option<PathBuf>> {
        if self.translator.relative(path)?.as_os_str().is_empty() {
            return Ok(None);
        }
        self.translator.to_mirror(path).map(Some)
    }

    fn create_dir(&self, source: &Path, mirror: PathBuf) -> Result<Applied> {
        match fs::create_dir(&mirror) {
            Ok(()) => {
                info!(mirror = %mirror.display(), source = %source.display(), "create folder");
                Ok(Applied::DirCreated(mirror))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                info!(mirror = %mirror.display(), "folder/file exists");
                Ok(Applied::Skipped(SkipReason::AlreadyExists))
            }
            Err(err) => Err(LinkError::io("create directory", mirror, err)),
        }
    }

    fn hard_link(&self, source: &Path, mirror: PathBuf) -> Result<Applied> {
        match fs::hard_link(source, &mirror) {
            Ok(()) => {
                info!(mirror = %mirror.display(), source = %source.display(), "create hardlink");
                Ok(Applied::Linked(mirror))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                info!(mirror = %mirror.display(), "folder/file exists");
                Ok(Applied::Skipped(SkipReason::AlreadyExists))
            }
            Err(err) => Err(link_error(source, mirror, err)),
        }
    }
}

impl EventHandler for MirrorReactor {
    fn on_created(&self, path: &Path, is_dir: bool) -> Result<Applied> {
        if !self.enabled(EventKind::Create) {
            return Ok(Applied::Masked);
        }
        let _entered = self.span.enter();
        debug!(path = %path.display(), is_dir, "created");

        let Some(mirror) = self.mirror_path(path)? else {
            return Ok(Applied::Skipped(SkipReason::Root));
        };
        ensure_parent_dirs(&mirror)?;

        if fs::symlink_metadata(&mirror).is_ok() {
            info!(mirror = %mirror.display(), "folder/file exists");
            return Ok(Applied::Skipped(SkipReason::AlreadyExists));
        }

        if is_dir {
            self.create_dir(path, mirror)
        } else {
            self.hard_link(path, mirror)
        }
    }

    fn on_deleted(&self, path: &Path, is_dir: bool) -> Result<Applied> {
        if !self.enabled(EventKind::Delete) {
            return Ok(Applied::Masked);
        }
        let _entered = self.span.enter();
        debug!(path = %path.display(), is_dir, "deleted");

        let Some(mirror) = self.mirror_path(path)? else {
            return Ok(Applied::Skipped(SkipReason::Root));
        };

        let metadata = match fs::symlink_metadata(&mirror) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(mirror = %mirror.display(), "already absent");
                return Ok(Applied::Skipped(SkipReason::AlreadyAbsent));
            }
            Err(err) => return Err(LinkError::io("stat", mirror, err)),
        };

        // Some backends cannot tell what a removed path was; the mirror entry
        // still can.
        if is_dir || metadata.is_dir() {
            match fs::remove_dir(&mirror) {
                Ok(()) => {
                    info!(mirror = %mirror.display(), source = %path.display(), "remove directory");
                    Ok(Applied::DirRemoved(mirror))
                }
                Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
                    Err(LinkError::DirectoryNotEmpty(mirror))
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Ok(Applied::Skipped(SkipReason::AlreadyAbsent))
                }
                Err(err) => Err(LinkError::io("remove directory", mirror, err)),
            }
        } else {
            match fs::remove_file(&mirror) {
                Ok(()) => {
                    info!(mirror = %mirror.display(), source = %path.display(), "unlink file");
                    Ok(Applied::Unlinked(mirror))
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Ok(Applied::Skipped(SkipReason::AlreadyAbsent))
                }
                Err(err) => Err(LinkError::io("unlink", mirror, err)),
            }
        }
    }

    fn on_moved(&self, old_path: &Path, new_path: &Path, is_dir: bool) -> Result<Applied> {
        if !self.enabled(EventKind::Move) {
            return Ok(Applied::Masked);
        }
        let _entered = self.span.enter();
        debug!(from = %old_path.display(), to = %new_path.display(), is_dir, "moved");

        if !self.translator.contains(old_path) || !self.translator.contains(new_path) {
            info!(
                from = %old_path.display(),
                to = %new_path.display(),
                "ignoring move across the watched root"
            );
            return Ok(Applied::Skipped(SkipReason::OutsideRoot));
        }

        let (Some(old_mirror), Some(new_mirror)) =
            (self.mirror_path(old_path)?, self.mirror_path(new_path)?)
        else {
            return Ok(Applied::Skipped(SkipReason::Root));
        };

        if fs::symlink_metadata(&old_mirror).is_err() {
            info!(mirror = %old_mirror.display(), "file/folder doesn't exist");
            return Ok(Applied::Skipped(SkipReason::AlreadyAbsent));
        }

        ensure_parent_dirs(&new_mirror)?;
        match fs::rename(&old_mirror, &new_mirror) {
            Ok(()) => {
                info!(
                    from = %old_mirror.display(),
                    to = %new_mirror.display(),
                    "move file"
                );
                Ok(Applied::Renamed {
                    from: old_mirror,
                    to: new_mirror,
                })
            }
            Err(err) => Err(rename_error(old_mirror, new_mirror, err)),
        }
    }
}

fn link_error(source: &Path, mirror: PathBuf, err: io::Error) -> LinkError {
    if err.kind() == io::ErrorKind::CrossesDevices {
        LinkError::CrossDevice {
            source_path: source.to_path_buf(),
            mirror_path: mirror,
        }
    } else {
        LinkError::io("hardlink", mirror, err)
    }
}

fn rename_error(from: PathBuf, to: PathBuf, err: io::Error) -> LinkError {
    if err.kind() == io::ErrorKind::CrossesDevices {
        LinkError::CrossDeviceRename { from, to }
    } else {
        LinkError::io("rename", from, err)
    }
}
