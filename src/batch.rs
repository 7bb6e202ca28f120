//! Batch accumulation: coalescing a burst of records into one dispatch.
//!
//! Blocks for the first record, drains whatever else is already queued
//! without blocking, then holds a short settle window to catch
//! near-simultaneous stragglers before finalizing. While a command runs or
//! a retry sleeps nobody calls in here, so watcher output piles up in the
//! kernel pipe buffer — that, not an internal queue, is the backpressure.

use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::Duration;

use crate::reader::RecordReader;

/// An ordered, non-empty sequence of event records. Insertion order is
/// arrival order; byte-identical duplicates are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    records: Vec<String>,
}

impl Batch {
    fn new(first: String) -> Self {
        Self {
            records: vec![first],
        }
    }

    fn push(&mut self, record: String) {
        self.records.push(record);
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// The payload handed to the command: records newline-joined, in
    /// arrival order.
    pub fn joined(&self) -> String {
        self.records.join("\n")
    }

    #[cfg(test)]
    pub fn from_records(records: Vec<String>) -> Self {
        assert!(!records.is_empty(), "a batch is never empty");
        Self { records }
    }
}

/// Assembles batches from a record stream.
pub struct BatchAccumulator<R> {
    reader: RecordReader<R>,
    settle: Duration,
}

impl<R: Read + AsRawFd> BatchAccumulator<R> {
    pub fn new(reader: RecordReader<R>, settle: Duration) -> Self {
        Self { reader, settle }
    }

    /// Block until at least one record arrives, then coalesce everything
    /// already queued plus anything landing within a settle window.
    ///
    /// Returns `Ok(None)` when the stream has closed with nothing pending —
    /// the watcher is gone and the engine should stop.
    pub fn next_batch(&mut self) -> io::Result<Option<Batch>> {
        let first = match self.reader.next_record()? {
            Some(record) => record,
            None => {
                tracing::debug!("Record stream closed ({:?})", self.reader.state());
                return Ok(None);
            }
        };
        let mut batch = Batch::new(first);

        loop {
            while self.reader.has_record_available()? {
                match self.reader.next_record()? {
                    Some(record) => batch.push(record),
                    // Stream closed mid-drain with a flushed tail: deliver
                    // what we have, closure surfaces on the next call.
                    None => return Ok(Some(batch)),
                }
            }

            // Settle pause, then one re-probe. New arrivals resume the
            // drain (and earn another settle); a quiet window finalizes.
            thread::sleep(self.settle);
            if !self.reader.has_record_available()? {
                break;
            }
        }

        tracing::debug!("Batch finalized with {} record(s)", batch.record_count());
        Ok(Some(batch))
    }
}
