//! Background capture loop.
//!
//! While running, the loop takes a capture every `interval` so image requests
//! always see a recent frame. It ends on the first of: cancellation, the
//! device leaving the started state, a capture failure, or the session being
//! dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::device::session::SessionShared;

/// Default interval between captures (about 30 fps).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(33);

/// Bound on waiting for a cancelled loop to finish.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings of one auto-capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCaptureConfig {
    /// Pause between the end of one capture and the start of the next.
    pub interval: Duration,
    /// Timeout handed to each capture.
    pub capture_timeout: Duration,
}

impl Default for AutoCaptureConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            capture_timeout: Duration::from_millis(1000),
        }
    }
}

impl AutoCaptureConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }
}

/// Handle to a running loop, owned by the session state.
#[derive(Debug)]
pub(crate) struct AutoCaptureHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl AutoCaptureHandle {
    pub(crate) fn spawn(shared: Weak<SessionShared>, config: AutoCaptureConfig) -> Self {
        let (cancel, cancelled) = watch::channel(false);
        tracing::info!("Auto capture started (interval {:?})", config.interval);
        let task = tokio::spawn(run_loop(shared, config, cancelled));
        Self { cancel, task }
    }

    /// True once the loop has ended by itself.
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the loop and wait up to `grace` for it to finish.
    ///
    /// Returns false when the loop did not finish in time; it is detached
    /// and will exit at its next cancellation check.
    pub(crate) async fn shutdown(self, grace: Duration) -> bool {
        let Self { cancel, task } = self;
        let _ = cancel.send(true);

        match tokio::time::timeout(grace, task).await {
            Ok(Ok(frames)) => {
                tracing::debug!("Auto capture stopped after {} frames", frames);
                true
            }
            Ok(Err(e)) => {
                tracing::warn!("Auto capture task failed: {}", e);
                true
            }
            Err(_) => {
                tracing::warn!("Auto capture did not stop within {:?}", grace);
                false
            }
        }
    }
}

async fn run_loop(
    shared: Weak<SessionShared>,
    config: AutoCaptureConfig,
    mut cancelled: watch::Receiver<bool>,
) -> u64 {
    let mut frames = 0u64;

    loop {
        if *cancelled.borrow() {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };

        // Waiting on the lock must stay cancellable: stop() holds it while
        // joining this task.
        let mut state = tokio::select! {
            biased;
            _ = cancelled.changed() => break,
            state = shared.state.lock() => state,
        };

        if !state.is_started() {
            tracing::debug!("Auto capture ending: device no longer started");
            break;
        }
        if let Err(e) = state.capture(&shared.cache, config.capture_timeout).await {
            tracing::warn!("Auto capture error: {}", e);
            break;
        }
        frames += 1;
        drop(state);
        drop(shared);

        tokio::select! {
            biased;
            _ = cancelled.changed() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }

    frames
}
