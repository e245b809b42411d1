//! Background token refresher.
//!
//! One task per session wakes up on a jittered interval, or earlier when the
//! held token is about to leave its fresh window, and calls
//! [`Session::tick`]. Failed ticks back off exponentially, capped at the
//! interval. The task stops when its [`RefresherHandle`] is dropped.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{Session, TickOutcome};

/// Refresher timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RefresherConfig {
    /// Base interval between freshness checks.
    pub interval: Duration,
    /// Maximum jitter, as a fraction of `interval` (0.0-1.0).
    pub jitter_fraction: f64,
    /// Delay after the first failed tick.
    pub initial_backoff: Duration,
    /// Upper bound on the backoff delay.
    pub max_backoff: Duration,
    /// Backoff growth factor.
    pub backoff_multiplier: f64,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            jitter_fraction: 0.1,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl RefresherConfig {
    /// Creates a config with the given interval; backoff is capped at it.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_backoff: interval,
            ..Self::default()
        }
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Interval plus or minus jitter.
    pub fn jittered_interval(&self) -> Duration {
        let base = self.interval.as_secs_f64();
        let range = base * self.jitter_fraction;
        let jitter = if range > 0.0 {
            rand::rng().random_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Delay before the next check when the last one succeeded.
    ///
    /// `refresh_due` is how long the held token stays fresh; the refresher
    /// wakes up no later than that.
    pub fn next_delay(&self, refresh_due: Option<Duration>) -> Duration {
        let interval = self.jittered_interval();
        match refresh_due {
            Some(due) => interval.min(due),
            None => interval,
        }
    }

    /// Delay after `consecutive_failures` failed checks.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(consecutive_failures - 1).unwrap_or(i32::MAX);
        let delay = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Commands accepted by a running refresher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherCommand {
    /// Check freshness now.
    TickNow,
    /// Stop the task.
    Stop,
}

/// Handle to a running refresher. Dropping it aborts the task.
#[derive(Debug)]
pub struct RefresherHandle {
    command_tx: mpsc::Sender<RefresherCommand>,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    /// Requests an immediate check.
    pub async fn tick_now(&self) -> Result<(), mpsc::error::SendError<RefresherCommand>> {
        self.command_tx.send(RefresherCommand::TickNow).await
    }

    /// Asks the task to stop after its current check.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<RefresherCommand>> {
        self.command_tx.send(RefresherCommand::Stop).await
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns the refresher for `session` on the current runtime.
pub fn spawn(session: Arc<Session>, config: RefresherConfig) -> RefresherHandle {
    let (command_tx, command_rx) = mpsc::channel(8);
    let task = tokio::spawn(run(session, config, command_rx));
    RefresherHandle { command_tx, task }
}

async fn run(
    session: Arc<Session>,
    config: RefresherConfig,
    mut command_rx: mpsc::Receiver<RefresherCommand>,
) {
    debug!(interval_secs = config.interval.as_secs(), "refresher started");
    let mut failures: u32 = 0;

    loop {
        let delay = if failures > 0 {
            config.backoff_delay(failures)
        } else {
            config.next_delay(session.refresh_due_in())
        };
        debug!(delay_ms = delay.as_millis() as u64, failures, "next freshness check");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = command_rx.recv() => match cmd {
                Some(RefresherCommand::TickNow) => debug!("tick requested"),
                Some(RefresherCommand::Stop) | None => break,
            },
        }

        match session.tick().await {
            TickOutcome::Idle | TickOutcome::Fresh => failures = 0,
            TickOutcome::Refreshed => {
                debug!("token refreshed in background");
                failures = 0;
            }
            TickOutcome::Failed(code) => {
                failures = failures.saturating_add(1);
                warn!(%code, failures, "background refresh failed, session kept");
            }
            TickOutcome::LoggedOut => {
                info!("refresh token rejected in background, session logged out");
                failures = 0;
            }
        }
    }

    debug!("refresher stopped");
}
