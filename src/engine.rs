//! The engine loop: accumulate a batch, dispatch it, retry until it lands.
//!
//! One worker thread drives the phases in strict sequence, so at most one
//! command runs at any time and batch N+1 never starts accumulating before
//! batch N's final successful dispatch. The loop ends when the watcher
//! stream closes.

use std::io::Read;
use std::os::unix::io::AsRawFd;

use anyhow::{Context, Result};

use crate::batch::BatchAccumulator;
use crate::config::EngineConfig;
use crate::dispatch::CommandDispatcher;
use crate::lifecycle::ProcessRegistry;
use crate::reader::RecordReader;
use crate::retry::RetryController;
use crate::watcher;

/// Spawn the watcher and run the engine until its stream closes.
pub fn run(config: &EngineConfig, registry: &ProcessRegistry) -> Result<()> {
    let mut watcher = watcher::spawn(config, registry)?;
    let stdout = watcher
        .take_stdout()
        .context("watcher stdout was not captured")?;

    // The handle outlives the loop so the watcher is killed and reaped on
    // every exit path.
    run_loop(stdout, config, registry)
}

/// The accumulate→dispatch→retry cycle over an already-open record stream.
fn run_loop<R: Read + AsRawFd>(
    stream: R,
    config: &EngineConfig,
    registry: &ProcessRegistry,
) -> Result<()> {
    let reader = RecordReader::new(stream, config.delimiter);
    let mut accumulator = BatchAccumulator::new(reader, config.settle);
    let dispatcher = CommandDispatcher::new(config.command.clone(), registry.clone());
    let mut retry = RetryController::new(config.retry_interval);

    loop {
        let batch = match accumulator
            .next_batch()
            .context("reading watcher stream")?
        {
            Some(batch) => batch,
            None => break,
        };

        tracing::info!("Dispatching batch of {} record(s)", batch.record_count());
        tracing::debug!("Batch records: {:?}", batch.records());
        retry.run_to_success(&batch, |b| dispatcher.dispatch(b))?;
    }

    tracing::info!("Watcher stream closed, shutting down");
    Ok(())
}
