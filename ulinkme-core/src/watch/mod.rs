//! Watch scheduling for link rules.
//!
//! Each registered rule gets its own bounded queue and its own worker task.
//! The worker handles one event at a time on the blocking pool, so events of
//! a single rule are applied strictly in delivery order while different
//! rules progress in parallel. Nothing is shared between rules except the
//! observer.
//!
//! Rename halves are paired inside the worker: a lone "to" is mirrored as a
//! create (with the contents of a moved-in directory) and a lone "from" as a
//! delete once [`WatchConfig::rename_window`] passes without its partner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{LinkError, Result};
use crate::event::{Applied, RawEvent};
use crate::reactor::MirrorReactor;
use crate::rule::LinkRule;
use rename::{RenamePairer, Step, expand_moved_in};

mod rename;
pub mod source;

pub use source::{EventSink, EventSource, ManualSource, NotifySource, WatchMessage, convert_event};

/// Tuning for the per-rule queues.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Capacity of each rule's queue. A full queue back-pressures the
    /// notification thread instead of dropping events.
    pub queue_capacity: usize,
    /// How long the first half of a rename waits for its partner before the
    /// entry is treated as moved out of the tree.
    pub rename_window: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            rename_window: Duration::from_millis(100),
        }
    }
}

/// Observer hook for surfacing per-event failures.
#[cfg_attr(test, mockall::automock)]
pub trait WatchObserver: Send + Sync {
    fn on_error(&self, source_root: &Path, error: &LinkError);

    fn on_watch_error(&self, source_root: &Path, message: &str);
}

/// No-op observer used when nothing else is wired up.
pub struct NoopWatchObserver;

impl WatchObserver for NoopWatchObserver {
    fn on_error(&self, _source_root: &Path, _error: &LinkError) {}

    fn on_watch_error(&self, _source_root: &Path, _message: &str) {}
}

impl fmt::Debug for NoopWatchObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoopWatchObserver")
    }
}

#[derive(Debug, Default)]
struct RuleStats {
    applied: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl RuleStats {
    fn record(&self, applied: &Applied) {
        let counter = if applied.changed() {
            &self.applied
        } else {
            &self.skipped
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counters for one rule, taken when the scheduler stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSummary {
    pub source_root: PathBuf,
    pub mirror_root: PathBuf,
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
}

struct RegisteredRule {
    rule: LinkRule,
    reactor: Arc<MirrorReactor>,
    stats: Arc<RuleStats>,
    worker: Option<JoinHandle<()>>,
}

impl RegisteredRule {
    fn summary(&self) -> RuleSummary {
        RuleSummary {
            source_root: self.rule.source_root().to_path_buf(),
            mirror_root: self.rule.mirror_root().to_path_buf(),
            applied: self.stats.applied.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for RegisteredRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredRule")
            .field("rule", &self.rule)
            .field("stats", &self.stats)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

/// Owns the registered rules, their reactors and their subscriptions.
pub struct WatchScheduler<S: EventSource = NotifySource, O: WatchObserver = NoopWatchObserver> {
    source: S,
    observer: Arc<O>,
    config: WatchConfig,
    rules: Vec<RegisteredRule>,
    running: bool,
}

impl<S: EventSource, O: WatchObserver> fmt::Debug for WatchScheduler<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchScheduler")
            .field("config", &self.config)
            .field("source_type", &std::any::type_name::<S>())
            .field("observer_type", &std::any::type_name::<O>())
            .field("rules", &self.rules)
            .field("running", &self.running)
            .finish()
    }
}

impl WatchScheduler {
    /// Scheduler backed by native notifications and no observer.
    pub fn with_notify(config: WatchConfig) -> Self {
        WatchScheduler::new(NotifySource::new(), Arc::new(NoopWatchObserver), config)
    }
}

impl<S: EventSource, O: WatchObserver + 'static> WatchScheduler<S, O> {
    pub fn new(source: S, observer: Arc<O>, config: WatchConfig) -> Self {
        Self {
            source,
            observer,
            config,
            rules: Vec::new(),
            running: false,
        }
    }

    /// Build the rule's reactor and schedule it. When the scheduler is
    /// already running the subscription starts immediately.
    pub fn register(&mut self, rule: LinkRule) -> Result<()> {
        for existing in &self.rules {
            if let Some(path) = rule.overlap_with(&existing.rule) {
                return Err(LinkError::RuleOverlap {
                    path: path.to_path_buf(),
                    existing: existing.rule.source_root().to_path_buf(),
                });
            }
        }

        info!(
            "scheduled a link from {} -> {}, events: {}",
            rule.mirror_root().display(),
            rule.source_root().display(),
            rule.events()
        );

        let reactor = Arc::new(MirrorReactor::new(&rule));
        self.rules.push(RegisteredRule {
            rule,
            reactor,
            stats: Arc::new(RuleStats::default()),
            worker: None,
        });

        if self.running {
            let index = self.rules.len() - 1;
            if let Err(err) = self.activate(index) {
                self.rules.pop();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Subscribe every registered rule and start its worker. Must be called
    /// from within a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.running = true;
        for index in 0..self.rules.len() {
            if self.rules[index].worker.is_none()
                && let Err(err) = self.activate(index)
            {
                // Stopping the source closes every queue; detached workers
                // drain what they already hold and exit.
                self.source.stop();
                self.running = false;
                for entry in &mut self.rules {
                    entry.worker = None;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop notification delivery, then wait until every queued event has
    /// been handled.
    pub async fn stop(&mut self) -> Vec<RuleSummary> {
        self.source.stop();
        self.running = false;

        for entry in &mut self.rules {
            if let Some(worker) = entry.worker.take()
                && let Err(err) = worker.await
            {
                error!(
                    source = %entry.rule.source_root().display(),
                    "watch worker ended abnormally: {err}"
                );
            }
        }

        self.rules.iter().map(RegisteredRule::summary).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn rules(&self) -> impl Iterator<Item = &LinkRule> {
        self.rules.iter().map(|entry| &entry.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn activate(&mut self, index: usize) -> Result<()> {
        let capacity = self.config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<WatchMessage>(capacity);

        let entry = &mut self.rules[index];
        // Events queue up in `rx` until the worker below starts draining it.
        self.source
            .subscribe(entry.rule.source_root(), entry.rule.recursive(), tx)
            .inspect_err(|err| {
                error!(
                    source = %entry.rule.source_root().display(),
                    "failed to watch: {err}"
                );
            })?;

        let worker = Worker {
            reactor: Arc::clone(&entry.reactor),
            stats: Arc::clone(&entry.stats),
            observer: Arc::clone(&self.observer),
        };
        let span = entry.reactor.span().clone();
        let pairer = RenamePairer::new(entry.rule.recursive());
        let window = self.config.rename_window;
        entry.worker = Some(tokio::spawn(
            worker.run(rx, pairer, window).instrument(span),
        ));
        Ok(())
    }
}

struct Worker<O> {
    reactor: Arc<MirrorReactor>,
    stats: Arc<RuleStats>,
    observer: Arc<O>,
}

impl<O: WatchObserver + 'static> Worker<O> {
    async fn run(
        self,
        mut rx: mpsc::Receiver<WatchMessage>,
        mut pairer: RenamePairer,
        window: Duration,
    ) {
        loop {
            let message = if pairer.is_waiting() {
                match timeout(window, rx.recv()).await {
                    Ok(message) => message,
                    Err(_) => {
                        if let Some(step) = pairer.flush() {
                            self.step(step).await;
                        }
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };
            let Some(message) = message else { break };
            for step in pairer.feed(message) {
                self.step(step).await;
            }
        }
        if let Some(step) = pairer.flush() {
            self.step(step).await;
        }
        debug!("watch queue closed");
    }

    async fn step(&self, step: Step) {
        match step {
            Step::Apply(event) => self.apply(event).await,
            Step::Populate(dir) => {
                let walked = spawn_blocking({
                    let dir = dir.clone();
                    move || expand_moved_in(&dir)
                })
                .await;
                match walked {
                    Ok(events) => {
                        for event in events {
                            self.apply(event).await;
                        }
                    }
                    Err(join_err) => {
                        self.stats.record_failure();
                        let err = LinkError::Internal(format!(
                            "walking {} panicked: {join_err}",
                            dir.display()
                        ));
                        error!("{err}");
                        self.observer.on_error(self.reactor.source_root(), &err);
                    }
                }
            }
            Step::Report(message) => {
                warn!("watch error: {message}");
                self.observer
                    .on_watch_error(self.reactor.source_root(), &message);
            }
        }
    }

    async fn apply(&self, event: RawEvent) {
        let handler = Arc::clone(&self.reactor);
        let description = event.to_string();
        let outcome = spawn_blocking(move || event.dispatch_to(handler.as_ref())).await;

        let err = match outcome {
            Ok(Ok(applied)) => {
                debug!(event = %description, ?applied, "handled");
                self.stats.record(&applied);
                return;
            }
            Ok(Err(err)) => {
                if err.is_loud() {
                    error!(event = %description, "{err}");
                } else {
                    warn!(event = %description, "{err}");
                }
                err
            }
            Err(join_err) => {
                let err = LinkError::Internal(format!("event handler panicked: {join_err}"));
                error!(event = %description, "{err}");
                err
            }
        };
        self.stats.record_failure();
        self.observer.on_error(self.reactor.source_root(), &err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;
    use crate::rule::{EventKind, EventMask};
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::{TempDir, tempdir};

    fn rule_in(tmp: &TempDir, src: &str, dst: &str, events: EventMask) -> LinkRule {
        fs::create_dir_all(tmp.path().join(src)).unwrap();
        LinkRule::new(tmp.path().join(src), tmp.path().join(dst), true, events).unwrap()
    }

    #[tokio::test]
    async fn applies_events_in_delivery_order() {
        let tmp = tempdir().unwrap();
        let rule = rule_in(&tmp, "src", "dst", EventMask::all());
        let src = rule.source_root().to_path_buf();
        let dst = rule.mirror_root().to_path_buf();

        let source = ManualSource::new();
        let mut scheduler =
            WatchScheduler::new(source.clone(), Arc::new(NoopWatchObserver), WatchConfig::default());
        scheduler.register(rule).unwrap();
        scheduler.start().unwrap();

        fs::create_dir(src.join("c")).unwrap();
        fs::write(src.join("c/b.txt"), b"x").unwrap();
        let events = [
            RawEvent::Created {
                path: src.join("a"),
                is_dir: true,
            },
            RawEvent::Created {
                path: src.join("c/b.txt"),
                is_dir: false,
            },
            RawEvent::Moved {
                old_path: src.join("c/b.txt"),
                new_path: src.join("a/b.txt"),
                is_dir: false,
            },
        ];
        for event in events {
            source.push(&src, event).await.unwrap();
        }

        let summaries = scheduler.stop().await;

        assert!(dst.join("a").is_dir());
        assert!(!dst.join("c/b.txt").exists());
        assert_eq!(
            fs::metadata(dst.join("a/b.txt")).unwrap().ino(),
            fs::metadata(src.join("c/b.txt")).unwrap().ino()
        );
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].applied, 3);
        assert_eq!(summaries[0].failed, 0);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_reported() {
        let tmp = tempdir().unwrap();
        let rule = rule_in(&tmp, "src", "dst", EventMask::all());
        let src = rule.source_root().to_path_buf();
        let dst = rule.mirror_root().to_path_buf();
        fs::create_dir(dst.join("full")).unwrap();
        fs::write(dst.join("full/keep"), b"x").unwrap();
        fs::write(src.join("after.txt"), b"x").unwrap();

        let mut observer = MockWatchObserver::new();
        observer
            .expect_on_error()
            .withf(|_, err| matches!(err, LinkError::DirectoryNotEmpty(_)))
            .times(1)
            .return_const(());
        observer
            .expect_on_error()
            .withf(|_, err| matches!(err, LinkError::Io { .. }))
            .times(1)
            .return_const(());
        observer.expect_on_watch_error().never();

        let source = ManualSource::new();
        let mut scheduler =
            WatchScheduler::new(source.clone(), Arc::new(observer), WatchConfig::default());
        scheduler.register(rule).unwrap();
        scheduler.start().unwrap();

        let events = [
            RawEvent::Deleted {
                path: src.join("full"),
                is_dir: true,
            },
            RawEvent::Created {
                path: src.join("vanished.txt"),
                is_dir: false,
            },
            RawEvent::Created {
                path: src.join("after.txt"),
                is_dir: false,
            },
        ];
        for event in events {
            source.push(&src, event).await.unwrap();
        }
        let summaries = scheduler.stop().await;

        assert!(dst.join("full/keep").exists());
        assert!(dst.join("after.txt").exists());
        assert_eq!(summaries[0].failed, 2);
        assert_eq!(summaries[0].applied, 1);
    }

    #[tokio::test]
    async fn rules_are_independent() {
        let tmp = tempdir().unwrap();
        let create_only = rule_in(
            &tmp,
            "one/src",
            "one/dst",
            [EventKind::Create].into_iter().collect(),
        );
        let delete_only = rule_in(
            &tmp,
            "two/src",
            "two/dst",
            [EventKind::Delete].into_iter().collect(),
        );
        let one = create_only.source_root().to_path_buf();
        let two = delete_only.source_root().to_path_buf();
        fs::write(one.join("f"), b"x").unwrap();
        fs::write(delete_only.mirror_root().join("f"), b"x").unwrap();
        let one_dst = create_only.mirror_root().to_path_buf();
        let two_dst = delete_only.mirror_root().to_path_buf();

        let source = ManualSource::new();
        let mut scheduler =
            WatchScheduler::new(source.clone(), Arc::new(NoopWatchObserver), WatchConfig::default());
        scheduler.register(create_only).unwrap();
        scheduler.register(delete_only).unwrap();
        scheduler.start().unwrap();
        assert_eq!(source.subscribed_roots().len(), 2);

        for root in [&one, &two] {
            source
                .push(
                    root,
                    RawEvent::Created {
                        path: root.join("f"),
                        is_dir: false,
                    },
                )
                .await
                .unwrap();
            source
                .push(
                    root,
                    RawEvent::Deleted {
                        path: root.join("f"),
                        is_dir: false,
                    },
                )
                .await
                .unwrap();
        }
        let summaries = scheduler.stop().await;

        assert!(one_dst.join("f").exists());
        assert!(!two_dst.join("f").exists());
        assert_eq!((summaries[0].applied, summaries[0].skipped), (1, 1));
        assert_eq!((summaries[1].applied, summaries[1].skipped), (1, 1));
    }

    #[tokio::test]
    async fn rejects_overlapping_registration() {
        let tmp = tempdir().unwrap();
        let first = rule_in(&tmp, "src", "dst", EventMask::all());
        let nested = rule_in(&tmp, "dst/inner", "other", EventMask::all());

        let mut scheduler = WatchScheduler::new(
            ManualSource::new(),
            Arc::new(NoopWatchObserver),
            WatchConfig::default(),
        );
        scheduler.register(first).unwrap();
        let err = scheduler.register(nested).unwrap_err();

        assert!(matches!(err, LinkError::RuleOverlap { .. }));
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn registering_while_running_subscribes_immediately() {
        let tmp = tempdir().unwrap();
        let source = ManualSource::new();
        let mut scheduler =
            WatchScheduler::new(source.clone(), Arc::new(NoopWatchObserver), WatchConfig::default());
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        let rule = rule_in(&tmp, "src", "dst", EventMask::all());
        let root = rule.source_root().to_path_buf();
        scheduler.register(rule).unwrap();

        assert_eq!(source.subscribed_roots(), vec![root]);
        scheduler.stop().await;
        assert!(source.subscribed_roots().is_empty());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn notify_source_watches_each_rule() {
        let tmp = tempdir().unwrap();
        let mut scheduler = WatchScheduler::with_notify(WatchConfig::default());
        scheduler
            .register(rule_in(&tmp, "a", "b", EventMask::all()))
            .unwrap();
        scheduler.start().unwrap();
        assert_eq!(scheduler.source().watcher_count(), 1);

        scheduler.stop().await;
        assert_eq!(scheduler.source().watcher_count(), 0);
    }

    #[derive(Debug)]
    struct RefusingSource {
        inner: ManualSource,
        refuse: Option<PathBuf>,
    }

    impl EventSource for RefusingSource {
        fn subscribe(&mut self, root: &Path, recursive: bool, sink: EventSink) -> Result<()> {
            if self.refuse.take_if(|refused| refused.as_path() == root).is_some() {
                return Err(LinkError::Internal(format!("refused {}", root.display())));
            }
            self.inner.subscribe(root, recursive, sink)
        }

        fn stop(&mut self) {
            self.inner.stop();
        }
    }

    #[tokio::test]
    async fn failed_start_can_be_retried_for_every_rule() {
        let tmp = tempdir().unwrap();
        let first = rule_in(&tmp, "one/src", "one/dst", EventMask::all());
        let second = rule_in(&tmp, "two/src", "two/dst", EventMask::all());
        let one = first.source_root().to_path_buf();
        let one_dst = first.mirror_root().to_path_buf();
        let two = second.source_root().to_path_buf();
        fs::write(one.join("f"), b"x").unwrap();

        let manual = ManualSource::new();
        let source = RefusingSource {
            inner: manual.clone(),
            refuse: Some(two.clone()),
        };
        let mut scheduler =
            WatchScheduler::new(source, Arc::new(NoopWatchObserver), WatchConfig::default());
        scheduler.register(first).unwrap();
        scheduler.register(second).unwrap();

        assert!(matches!(scheduler.start(), Err(LinkError::Internal(_))));
        assert!(!scheduler.is_running());
        assert!(manual.subscribed_roots().is_empty());
        assert!(!format!("{scheduler:?}").contains("running: true"));

        scheduler.start().unwrap();
        let mut roots = manual.subscribed_roots();
        roots.sort();
        assert_eq!(roots, vec![one.clone(), two]);

        manual
            .push(
                &one,
                RawEvent::Created {
                    path: one.join("f"),
                    is_dir: false,
                },
            )
            .await
            .unwrap();
        let summaries = scheduler.stop().await;

        assert!(one_dst.join("f").exists());
        assert_eq!(summaries[0].applied, 1);
    }

    #[tokio::test]
    async fn unpaired_rename_halves_are_mirrored() {
        let tmp = tempdir().unwrap();
        let rule = rule_in(&tmp, "src", "dst", EventMask::all());
        let src = rule.source_root().to_path_buf();
        let dst = rule.mirror_root().to_path_buf();
        fs::write(src.join("in.txt"), b"in").unwrap();
        fs::create_dir(src.join("box")).unwrap();
        fs::write(src.join("box/inner.txt"), b"inner").unwrap();
        fs::write(src.join("b"), b"b").unwrap();
        fs::hard_link(src.join("b"), dst.join("a")).unwrap();
        fs::write(dst.join("out.txt"), b"out").unwrap();

        let source = ManualSource::new();
        let mut scheduler =
            WatchScheduler::new(source.clone(), Arc::new(NoopWatchObserver), WatchConfig::default());
        scheduler.register(rule).unwrap();
        scheduler.start().unwrap();

        let messages = [
            WatchMessage::RenameTo {
                tracker: Some(1),
                path: src.join("in.txt"),
                is_dir: false,
            },
            WatchMessage::RenameTo {
                tracker: Some(2),
                path: src.join("box"),
                is_dir: true,
            },
            WatchMessage::RenameFrom {
                tracker: Some(4),
                path: src.join("a"),
            },
            WatchMessage::RenameTo {
                tracker: Some(4),
                path: src.join("b"),
                is_dir: false,
            },
            WatchMessage::Event(RawEvent::Moved {
                old_path: src.join("a"),
                new_path: src.join("b"),
                is_dir: false,
            }),
            WatchMessage::RenameFrom {
                tracker: Some(3),
                path: src.join("out.txt"),
            },
        ];
        for message in messages {
            source.push_message(&src, message).await.unwrap();
        }
        let summaries = scheduler.stop().await;

        let ino = |path: PathBuf| fs::metadata(path).unwrap().ino();
        assert_eq!(ino(dst.join("in.txt")), ino(src.join("in.txt")));
        assert_eq!(ino(dst.join("box/inner.txt")), ino(src.join("box/inner.txt")));
        assert_eq!(ino(dst.join("b")), ino(src.join("b")));
        assert!(!dst.join("a").exists());
        assert!(!dst.join("out.txt").exists());
        assert_eq!((summaries[0].applied, summaries[0].failed), (5, 0));
    }

    #[tokio::test]
    async fn lone_from_half_expires_into_a_delete() {
        let tmp = tempdir().unwrap();
        let rule = rule_in(&tmp, "src", "dst", EventMask::all());
        let src = rule.source_root().to_path_buf();
        let dst = rule.mirror_root().to_path_buf();
        fs::write(dst.join("gone.txt"), b"x").unwrap();

        let source = ManualSource::new();
        let config = WatchConfig {
            rename_window: Duration::from_millis(10),
            ..WatchConfig::default()
        };
        let mut scheduler = WatchScheduler::new(source.clone(), Arc::new(NoopWatchObserver), config);
        scheduler.register(rule).unwrap();
        scheduler.start().unwrap();

        source
            .push_message(
                &src,
                WatchMessage::RenameFrom {
                    tracker: Some(9),
                    path: src.join("gone.txt"),
                },
            )
            .await
            .unwrap();

        let mut waited = Duration::ZERO;
        while dst.join("gone.txt").exists() && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert!(!dst.join("gone.txt").exists());
        scheduler.stop().await;
    }
}
