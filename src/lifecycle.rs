//! Descendant process tracking and signal-driven teardown.
//!
//! Every child this engine spawns (the watcher subprocess and the in-flight
//! command) runs in its own process group and is registered here for the
//! duration of its life. A dedicated signal thread listens for SIGINT,
//! SIGTERM, and SIGHUP; on the first one it terminates every registered
//! group and exits the process with status 1, no matter which blocking call
//! the main thread is currently parked in (stream read, settle pause,
//! command wait, or retry sleep).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Exit status used for signal-driven termination.
pub const SIGNAL_EXIT_CODE: i32 = 1;

/// Registry of live descendant process groups — cheap to clone, shared with
/// the signal thread.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    groups: Arc<Mutex<HashSet<i32>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a child spawned as its own process-group leader. The returned
    /// guard deregisters the group when dropped.
    pub fn register(&self, pid: u32) -> ProcessGuard {
        let pgid = pid as i32;
        self.lock().insert(pgid);
        ProcessGuard {
            registry: self.clone(),
            pgid,
        }
    }

    /// Send SIGTERM to every registered process group.
    pub fn kill_all(&self) {
        let groups = self.lock();
        for &pgid in groups.iter() {
            tracing::debug!("Sending SIGTERM to process group {}", pgid);
            // The group may already be gone; nothing to do about a failure here.
            unsafe {
                libc::killpg(pgid, libc::SIGTERM);
            }
        }
    }

    /// Number of currently registered groups.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn deregister(&self, pgid: i32) {
        self.lock().remove(&pgid);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<i32>> {
        // A poisoned lock only means another thread panicked mid-update;
        // the set itself is still usable for teardown.
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deregisters a process group on drop.
pub struct ProcessGuard {
    registry: ProcessRegistry,
    pgid: i32,
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.pgid);
    }
}

/// Install the signal thread. On SIGINT/SIGTERM/SIGHUP it terminates every
/// registered descendant group and exits the process with a non-zero status.
pub fn install_signal_handlers(registry: ProcessRegistry) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("installing signal handlers")?;

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                tracing::info!(
                    "Received signal {}, terminating {} descendant(s)",
                    signal,
                    registry.tracked()
                );
                registry.kill_all();
                std::process::exit(SIGNAL_EXIT_CODE);
            }
        })
        .context("spawning signal thread")?;

    Ok(())
}
