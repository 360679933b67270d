//! Notification sources feeding per-rule queues.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{LinkError, Result};
use crate::event::RawEvent;

/// Message delivered to a rule's processing queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    Event(RawEvent),
    /// First half of a rename. `tracker` links it to the matching
    /// [`WatchMessage::RenameTo`] when the backend provides one.
    RenameFrom {
        tracker: Option<usize>,
        path: PathBuf,
    },
    /// Second half of a rename.
    RenameTo {
        tracker: Option<usize>,
        path: PathBuf,
        is_dir: bool,
    },
    Error(String),
}

/// Sending half of a rule's processing queue.
pub type EventSink = mpsc::Sender<WatchMessage>;

/// Something that can observe a directory tree and push typed events into a
/// sink, in the order it saw them.
pub trait EventSource: Send {
    fn subscribe(&mut self, root: &Path, recursive: bool, sink: EventSink) -> Result<()>;

    /// Stop delivering events. Every sink handed to `subscribe` must be
    /// released so the receiving queues can drain and close.
    fn stop(&mut self);
}

/// Native OS notifications through `notify`, one watcher per subscription.
#[derive(Default)]
pub struct NotifySource {
    config: NotifyConfig,
    watchers: Vec<(PathBuf, RecommendedWatcher)>,
}

impl NotifySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: NotifyConfig) -> Self {
        Self {
            config,
            watchers: Vec::new(),
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

impl fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roots: Vec<_> = self.watchers.iter().map(|(root, _)| root).collect();
        f.debug_struct("NotifySource")
            .field("config", &self.config)
            .field("roots", &roots)
            .finish()
    }
}

impl EventSource for NotifySource {
    fn subscribe(&mut self, root: &Path, recursive: bool, sink: EventSink) -> Result<()> {
        let root_clone = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                let message = match res {
                    Ok(event) => match convert_event(event) {
                        Some(message) => message,
                        None => return,
                    },
                    Err(err) => WatchMessage::Error(err.to_string()),
                };
                if let Err(err) = sink.blocking_send(message) {
                    debug!(
                        "watch queue closed for {}, dropping {:?}",
                        root_clone.display(),
                        err.0
                    );
                }
            },
            self.config,
        )
        .map_err(|err| {
            LinkError::Internal(format!(
                "failed to create watcher for {}: {}",
                root.display(),
                err
            ))
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(root, mode)?;

        self.watchers.push((root.to_path_buf(), watcher));
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping a watcher stops its notify stream and releases the sink
        // captured by its callback.
        self.watchers.clear();
    }
}

/// Source fed by hand, for embedding another notification mechanism or for
/// replaying a recorded event stream.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    sinks: Arc<Mutex<HashMap<PathBuf, EventSink>>>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink subscribed for `root`, if any. Drop the returned handle before
    /// stopping, otherwise the rule's queue stays open.
    pub fn sink(&self, root: &Path) -> Option<EventSink> {
        self.sinks
            .lock()
            .ok()
            .and_then(|sinks| sinks.get(root).cloned())
    }

    /// Queue `event` for the rule watching `root`.
    pub async fn push(&self, root: &Path, event: RawEvent) -> Result<()> {
        self.push_message(root, WatchMessage::Event(event)).await
    }

    pub async fn push_message(&self, root: &Path, message: WatchMessage) -> Result<()> {
        let sink = self.sink(root).ok_or_else(|| {
            LinkError::Internal(format!("no subscription for {}", root.display()))
        })?;
        sink.send(message)
            .await
            .map_err(|_| LinkError::Internal(format!("watch queue for {} closed", root.display())))
    }

    pub fn subscribed_roots(&self) -> Vec<PathBuf> {
        self.sinks
            .lock()
            .map(|sinks| sinks.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl EventSource for ManualSource {
    fn subscribe(&mut self, root: &Path, _recursive: bool, sink: EventSink) -> Result<()> {
        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| LinkError::Internal("manual source lock poisoned".into()))?;
        sinks.insert(root.to_path_buf(), sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.clear();
        }
    }
}

/// Translate a raw notify event into a queue message. Returns `None` for
/// notifications that carry no topology change.
pub fn convert_event(event: Event) -> Option<WatchMessage> {
    if event.need_rescan() {
        return Some(WatchMessage::Error(
            "notification queue overflowed; mirror may be missing changes".into(),
        ));
    }

    let tracker = event.tracker();
    let mut paths = event.paths.into_iter();
    let raw = match event.kind {
        EventKind::Create(kind) => {
            let path = paths.next()?;
            let is_dir = match kind {
                CreateKind::Folder => true,
                CreateKind::File => false,
                CreateKind::Any | CreateKind::Other => match fs::symlink_metadata(&path) {
                    Ok(metadata) => metadata.is_dir(),
                    Err(_) => {
                        trace!(path = %path.display(), "created entry vanished before inspection");
                        return None;
                    }
                },
            };
            RawEvent::Created { path, is_dir }
        }
        EventKind::Remove(kind) => {
            let path = paths.next()?;
            RawEvent::Deleted {
                path,
                is_dir: matches!(kind, RemoveKind::Folder),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let old_path = paths.next()?;
            let Some(new_path) = paths.next() else {
                warn!(path = %old_path.display(), "rename notification without destination");
                return None;
            };
            let is_dir = fs::symlink_metadata(&new_path)
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false);
            RawEvent::Moved {
                old_path,
                new_path,
                is_dir,
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            let path = paths.next()?;
            return Some(WatchMessage::RenameFrom { tracker, path });
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            let path = paths.next()?;
            let is_dir = fs::symlink_metadata(&path)
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false);
            return Some(WatchMessage::RenameTo {
                tracker,
                path,
                is_dir,
            });
        }
        EventKind::Modify(ModifyKind::Name(mode)) => {
            // Backends that cannot tell the halves apart: whichever end still
            // exists is the destination.
            let path = paths.next()?;
            debug!(?mode, path = %path.display(), "untyped rename");
            return Some(match fs::symlink_metadata(&path) {
                Ok(metadata) => WatchMessage::RenameTo {
                    tracker,
                    path,
                    is_dir: metadata.is_dir(),
                },
                Err(_) => WatchMessage::RenameFrom { tracker, path },
            });
        }
        _ => return None,
    };
    Some(WatchMessage::Event(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, Flag};
    use tempfile::tempdir;

    #[test]
    fn converts_typed_creates_and_removes() {
        let create_dir = Event::new(EventKind::Create(CreateKind::Folder)).add_path("/s/d".into());
        assert_eq!(
            convert_event(create_dir),
            Some(WatchMessage::Event(RawEvent::Created {
                path: "/s/d".into(),
                is_dir: true
            }))
        );

        let remove_file = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/s/f".into());
        assert_eq!(
            convert_event(remove_file),
            Some(WatchMessage::Event(RawEvent::Deleted {
                path: "/s/f".into(),
                is_dir: false
            }))
        );

        let remove_dir = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path("/s/d".into());
        assert!(matches!(
            convert_event(remove_dir),
            Some(WatchMessage::Event(RawEvent::Deleted { is_dir: true, .. }))
        ));
    }

    #[test]
    fn untyped_create_is_resolved_from_disk() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("d");
        fs::create_dir(&dir).unwrap();

        let event = Event::new(EventKind::Create(CreateKind::Any)).add_path(dir.clone());
        assert_eq!(
            convert_event(event),
            Some(WatchMessage::Event(RawEvent::Created {
                path: dir,
                is_dir: true
            }))
        );

        let gone = Event::new(EventKind::Create(CreateKind::Any)).add_path(tmp.path().join("gone"));
        assert_eq!(convert_event(gone), None);
    }

    #[test]
    fn renames_keep_both_halves_and_their_tracker() {
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/s/a".into())
            .add_path("/s/b".into());
        assert_eq!(
            convert_event(both),
            Some(WatchMessage::Event(RawEvent::Moved {
                old_path: "/s/a".into(),
                new_path: "/s/b".into(),
                is_dir: false
            }))
        );

        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .set_tracker(42)
            .add_path("/s/a".into());
        assert_eq!(
            convert_event(from),
            Some(WatchMessage::RenameFrom {
                tracker: Some(42),
                path: "/s/a".into()
            })
        );

        let tmp = tempdir().unwrap();
        let arrived = tmp.path().join("arrived");
        fs::create_dir(&arrived).unwrap();
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .set_tracker(42)
            .add_path(arrived.clone());
        assert_eq!(
            convert_event(to),
            Some(WatchMessage::RenameTo {
                tracker: Some(42),
                path: arrived.clone(),
                is_dir: true
            })
        );

        let any_existing =
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any))).add_path(arrived);
        assert!(matches!(
            convert_event(any_existing),
            Some(WatchMessage::RenameTo { is_dir: true, .. })
        ));
        let any_gone = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(tmp.path().join("left"));
        assert!(matches!(
            convert_event(any_gone),
            Some(WatchMessage::RenameFrom { tracker: None, .. })
        ));
    }

    #[test]
    fn content_and_access_events_are_dropped() {
        let data = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/s/f".into());
        assert_eq!(convert_event(data), None);

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path("/s/f".into());
        assert_eq!(convert_event(access), None);
    }

    #[test]
    fn overflow_becomes_an_error_message() {
        let overflow = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert!(matches!(
            convert_event(overflow),
            Some(WatchMessage::Error(_))
        ));
    }

    #[tokio::test]
    async fn manual_source_releases_sinks_on_stop() {
        let mut source = ManualSource::new();
        let (tx, mut rx) = mpsc::channel(4);
        source.subscribe(Path::new("/s"), true, tx).unwrap();
        assert_eq!(source.subscribed_roots(), vec![PathBuf::from("/s")]);

        source
            .push(
                Path::new("/s"),
                RawEvent::Created {
                    path: "/s/x".into(),
                    is_dir: false,
                },
            )
            .await
            .unwrap();
        source.stop();

        assert!(matches!(rx.recv().await, Some(WatchMessage::Event(_))));
        assert_eq!(rx.recv().await, None);
        let late = RawEvent::Created {
            path: "/s/y".into(),
            is_dir: false,
        };
        assert!(source.push(Path::new("/s"), late).await.is_err());
    }
}
