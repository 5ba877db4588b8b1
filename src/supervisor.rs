//! Interruptible run loop shared by the crawl and download phases.
//!
//! Each phase is a [`Phase`]: one call to [`Phase::run_pass`] does a unit of
//! work (one full crawl, one download batch). The [`Supervisor`] alternates
//! passes and sleeps as a small state machine:
//!
//! ```text
//! Running --pass done--> Sleeping --interval elapsed--> Running
//!    |                       |
//!    +------ stop / max_passes reached ------> Stopped
//! ```
//!
//! A pass that returns an error is logged and followed by the usual sleep;
//! it never ends the loop.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// State of a supervised loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// About to run (or running) a pass.
    Running,
    /// Waiting out the interval between passes.
    Sleeping,
    /// Finished; no further passes.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Stopped => "stopped",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cloneable stop flag that also wakes sleeping waiters.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    /// Creates a signal in the "not stopped" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves when a stop is requested.
    pub async fn stopped(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent stop() is not missed.
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }

    /// Sleeps for `duration` unless stopped first.
    ///
    /// Returns true if the sleep was cut short by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.stopped() => true,
            () = tokio::time::sleep(duration) => self.is_stopped(),
        }
    }
}

/// One unit of repeated work driven by a [`Supervisor`].
#[async_trait]
pub trait Phase: Send + Sync {
    /// Per-pass summary, logged after each pass.
    type Report: fmt::Display + Send;
    /// Error that ends a pass early.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Short name used in log events.
    fn name(&self) -> &'static str;

    /// Runs one pass, checking `stop` between work items.
    async fn run_pass(&self, stop: &StopSignal) -> Result<Self::Report, Self::Error>;
}

/// Totals for a whole supervised run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Passes started.
    pub passes: u64,
    /// Passes that returned an error.
    pub failed_passes: u64,
}

/// Drives a [`Phase`] until stopped.
#[derive(Debug, Clone)]
pub struct Supervisor {
    interval: Duration,
    max_passes: Option<u64>,
    stop: StopSignal,
}

impl Supervisor {
    /// Creates a supervisor sleeping `interval` between passes.
    #[must_use]
    pub fn new(interval: Duration, stop: StopSignal) -> Self {
        Self {
            interval,
            max_passes: None,
            stop,
        }
    }

    /// Stops after `max_passes` passes (`Some(1)` runs exactly once).
    #[must_use]
    pub fn with_max_passes(mut self, max_passes: Option<u64>) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Returns the stop signal watched by this supervisor.
    #[must_use]
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Runs passes of `phase` until a stop is requested or `max_passes` is reached.
    pub async fn run<P: Phase>(&self, phase: &P) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut state = LoopState::Running;

        info!(phase = phase.name(), interval_secs = self.interval.as_secs(), "loop started");

        loop {
            state = match state {
                LoopState::Running => {
                    if self.stop.is_stopped() {
                        LoopState::Stopped
                    } else {
                        summary.passes += 1;
                        match phase.run_pass(&self.stop).await {
                            Ok(report) => {
                                info!(phase = phase.name(), pass = summary.passes, %report, "pass complete");
                            }
                            Err(e) => {
                                summary.failed_passes += 1;
                                error!(phase = phase.name(), pass = summary.passes, error = %e, "pass failed");
                            }
                        }
                        if self.max_passes.is_some_and(|max| summary.passes >= max) {
                            LoopState::Stopped
                        } else {
                            LoopState::Sleeping
                        }
                    }
                }
                LoopState::Sleeping => {
                    debug!(phase = phase.name(), secs = self.interval.as_secs(), "sleeping");
                    if self.stop.sleep(self.interval).await {
                        LoopState::Stopped
                    } else {
                        LoopState::Running
                    }
                }
                LoopState::Stopped => break,
            };
        }

        info!(
            phase = phase.name(),
            passes = summary.passes,
            failed_passes = summary.failed_passes,
            "loop stopped"
        );
        summary
    }
}

/// Stops `stop` on Ctrl-C, and on SIGTERM where supported.
pub fn stop_on_shutdown_signal(stop: StopSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, finishing current step");
        stop.stop();
    })
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "cannot listen for SIGTERM, Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
