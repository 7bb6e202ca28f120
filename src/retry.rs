//! Indefinite fixed-interval retry of a failed dispatch.
//!
//! A batch that fails is retried forever with the same content until the
//! command exits 0 — no backoff growth, no attempt cap. Operators run this
//! under supervision and rely on eventual success once whatever external
//! condition broke the command clears. While a retry is pending the engine
//! never reads from the watcher, so newly arriving records wait in the pipe
//! buffer for the next batch.

use std::process::ExitStatus;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::batch::Batch;
use crate::error_tracker::ConsecutiveFailureTracker;

/// Where the controller currently is for the active batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// No batch active.
    Idle,
    /// An attempt is running.
    Attempting,
    /// The last attempt failed; sleeping out the retry interval.
    Retrying,
    /// The active batch was dispatched successfully.
    Succeeded,
}

/// Drives dispatch attempts for one batch at a time until success.
pub struct RetryController {
    interval: Duration,
    phase: RetryPhase,
    tracker: ConsecutiveFailureTracker,
}

impl RetryController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            phase: RetryPhase::Idle,
            tracker: ConsecutiveFailureTracker::new(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Run `attempt` against the batch until it reports exit 0, sleeping the
    /// fixed interval between failures. The batch is passed unchanged to
    /// every attempt.
    ///
    /// Only an attempt that could not run at all (spawn error) escapes as
    /// `Err`; a non-zero exit is handled here.
    pub fn run_to_success<F>(&mut self, batch: &Batch, mut attempt: F) -> Result<()>
    where
        F: FnMut(&Batch) -> Result<ExitStatus>,
    {
        loop {
            self.phase = RetryPhase::Attempting;
            let status = attempt(batch)?;

            if status.success() {
                if let Some(recovery) = self.tracker.record_success() {
                    match recovery.outage {
                        Some(outage) => tracing::info!(
                            "Command succeeded after {} failed attempt(s) over {:.0?}",
                            recovery.failures,
                            outage
                        ),
                        None => tracing::info!(
                            "Command succeeded after {} failed attempt(s)",
                            recovery.failures
                        ),
                    }
                }
                self.phase = RetryPhase::Succeeded;
                return Ok(());
            }

            if self.tracker.record_failure() {
                let attempts = self.tracker.consecutive_count();
                let cause = match status.code() {
                    Some(code) => format!("exit code {}", code),
                    None => "termination by signal".to_string(),
                };
                if attempts > 1 {
                    tracing::warn!(
                        "Command still failing after {} attempt(s) ({}), retrying every {:?}",
                        attempts,
                        cause,
                        self.interval
                    );
                } else {
                    tracing::warn!("Command failed ({}), retrying in {:?}", cause, self.interval);
                }
            }

            self.phase = RetryPhase::Retrying;
            thread::sleep(self.interval);
        }
    }
}
