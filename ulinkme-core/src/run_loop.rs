//! Process lifetime: start delivery, block until told to stop, drain.

use std::future::Future;

use tracing::{info, warn};

use crate::error::Result;
use crate::watch::{
    EventSource, NoopWatchObserver, NotifySource, RuleSummary, WatchObserver, WatchScheduler,
};

#[derive(Debug)]
pub struct RunLoop<S: EventSource = NotifySource, O: WatchObserver = NoopWatchObserver> {
    scheduler: WatchScheduler<S, O>,
}

impl<S: EventSource, O: WatchObserver + 'static> RunLoop<S, O> {
    pub fn new(scheduler: WatchScheduler<S, O>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &WatchScheduler<S, O> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut WatchScheduler<S, O> {
        &mut self.scheduler
    }

    /// Begin background event delivery for every registered rule.
    pub fn start(&mut self) -> Result<()> {
        if self.scheduler.is_empty() {
            warn!("no links configured; nothing will be mirrored");
        }
        self.scheduler.start()?;
        info!(rules = self.scheduler.len(), "watching");
        Ok(())
    }

    /// Halt delivery and wait for in-flight events to finish.
    pub async fn stop(&mut self) -> Vec<RuleSummary> {
        let summaries = self.scheduler.stop().await;
        for summary in &summaries {
            info!(
                source = %summary.source_root.display(),
                mirror = %summary.mirror_root.display(),
                applied = summary.applied,
                skipped = summary.skipped,
                failed = summary.failed,
                "link stopped"
            );
        }
        summaries
    }

    /// Start, block until `shutdown` resolves, then stop cleanly.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<Vec<RuleSummary>>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        shutdown.await;
        info!("shutdown requested, draining pending events");
        Ok(self.stop().await)
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
