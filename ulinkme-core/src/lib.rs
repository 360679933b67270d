//! # ulinkme core
//!
//! Keeps a mirror directory tree in sync with a source tree by replaying
//! filesystem notifications as hardlink operations. File contents are never
//! copied: every mirrored file is a second directory entry for the same
//! inode, so the mirror costs no extra space and sees in-place edits for
//! free.
//!
//! ## Architecture
//!
//! - [`rule`]: validated link rules and the event mask each rule reacts to
//! - [`translate`]: source-to-mirror path translation
//! - [`event`]: typed events and the [`EventHandler`] capability
//! - [`reactor`]: the per-rule handler that touches the mirror tree
//! - [`watch`]: notification sources and the per-rule scheduler
//! - [`run_loop`]: process lifetime and signal handling
//!
//! ## Example
//!
//! ```no_run
//! use ulinkme_core::{EventMask, LinkRule, RunLoop, WatchConfig, WatchScheduler, shutdown_signal};
//!
//! # async fn run() -> ulinkme_core::Result<()> {
//! let rule = LinkRule::new("/srv/incoming", "/srv/library", true, EventMask::all())?;
//!
//! let mut scheduler = WatchScheduler::with_notify(WatchConfig::default());
//! scheduler.register(rule)?;
//!
//! let summaries = RunLoop::new(scheduler).run_until(shutdown_signal()).await?;
//! for summary in summaries {
//!     println!("{} changes applied", summary.applied);
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Error types shared by every stage of the pipeline
pub mod error;

/// Typed filesystem events
pub mod event;

/// Mirror-side operations for a single rule
pub mod reactor;

/// Link rules and event masks
pub mod rule;

/// Start, wait, drain
pub mod run_loop;

/// Source and mirror path translation
pub mod translate;

/// Notification sources and scheduling
pub mod watch;

pub use error::{LinkError, Result};
pub use event::{Applied, EventHandler, RawEvent, SkipReason};
pub use reactor::MirrorReactor;
pub use rule::{
    EventKind, EventMask, LinkRule, ParseEventKindError, resolve_root, roots_overlap,
};
pub use run_loop::{RunLoop, shutdown_signal};
pub use translate::{PathTranslator, ensure_parent_dirs};
pub use watch::{
    EventSource, ManualSource, NoopWatchObserver, NotifySource, RuleSummary, WatchConfig,
    WatchMessage, WatchObserver, WatchScheduler,
};
