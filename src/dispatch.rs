//! Command dispatch: one child process per batch attempt.
//!
//! The batch is exposed to the command through a single environment
//! variable, newline-joined in arrival order. The child runs in its own
//! process group so the lifecycle registry can terminate it (and anything
//! it spawned) as a unit. Dispatch is synchronous — the engine holds here
//! until the command exits, which is what serializes invocations.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};

use crate::batch::Batch;
use crate::lifecycle::ProcessRegistry;

/// Environment variable carrying the batch records to the command.
pub const EVENTS_ENV_VAR: &str = "FSBATCH_EVENTS";

/// The user command: executable plus argument vector, fixed for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandSpec {
    /// Split an argv into program + arguments. `None` for an empty argv.
    pub fn from_argv(mut argv: Vec<OsString>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        let program = argv.remove(0);
        Some(Self {
            program,
            args: argv,
        })
    }

    /// Human-readable form for log lines.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// Runs the configured command against a batch and reports its exit status.
pub struct CommandDispatcher {
    spec: CommandSpec,
    registry: ProcessRegistry,
}

impl CommandDispatcher {
    pub fn new(spec: CommandSpec, registry: ProcessRegistry) -> Self {
        Self { spec, registry }
    }

    /// Invoke the command once with the batch in `FSBATCH_EVENTS` and wait
    /// for it to finish.
    ///
    /// A spawn failure (missing binary, permissions) is an error, not a
    /// non-zero exit: retrying cannot clear it, so the caller treats it as
    /// fatal.
    pub fn dispatch(&self, batch: &Batch) -> Result<ExitStatus> {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .env(EVENTS_ENV_VAR, batch.joined())
            .process_group(0);

        tracing::debug!(
            "Running `{}` with {} record(s)",
            self.spec.display(),
            batch.record_count()
        );

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning command `{}`", self.spec.display()))?;
        let _guard = self.registry.register(child.id());

        let status = child
            .wait()
            .with_context(|| format!("waiting for command `{}`", self.spec.display()))?;
        Ok(status)
    }
}
