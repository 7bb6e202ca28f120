//! Delimited record reader over the watcher's stdout pipe.
//!
//! The watcher emits opaque text records separated by a single delimiter
//! byte (NUL by default). Two explicitly separate operations are exposed:
//! a blocking `next_record()` that is the only trustworthy end-of-stream
//! signal, and a non-blocking `has_record_available()` probe used for the
//! opportunistic drain. `poll(2)` reports a closed pipe as readable, so the
//! probe is deliberately NOT treated as an end-of-stream signal — callers
//! resolve the ambiguity with the blocking read, which keeps the drain loop
//! from busy-spinning at EOF.

use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};

/// State of the underlying record stream as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Data has been flowing; no evidence of closure.
    Open,
    /// The last non-blocking probe found nothing immediately available.
    /// The stream may still be open — only a blocking read can tell.
    Draining,
    /// A blocking read observed end-of-stream; nothing more will arrive.
    Closed,
}

/// Reads delimiter-separated records from a pipe.
pub struct RecordReader<R> {
    source: R,
    delimiter: u8,
    pending: Vec<u8>,
    source_eof: bool,
    state: StreamState,
}

impl<R: Read + AsRawFd> RecordReader<R> {
    pub fn new(source: R, delimiter: u8) -> Self {
        Self {
            source,
            delimiter,
            pending: Vec::new(),
            source_eof: false,
            state: StreamState::Open,
        }
    }

    /// Blocking read of the next record. Returns `Ok(None)` once the stream
    /// is permanently closed.
    ///
    /// If the stream closes after a flushed partial record with no trailing
    /// delimiter, that record is returned once and the closure is reported
    /// on the next call.
    pub fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == self.delimiter) {
                let mut record: Vec<u8> = self.pending.drain(..=pos).collect();
                record.pop(); // trailing delimiter
                self.state = StreamState::Open;
                return Ok(Some(String::from_utf8_lossy(&record).into_owned()));
            }

            if self.source_eof {
                if self.pending.is_empty() {
                    self.state = StreamState::Closed;
                    return Ok(None);
                }
                // Final partial record, flushed without a delimiter.
                let record = std::mem::take(&mut self.pending);
                return Ok(Some(String::from_utf8_lossy(&record).into_owned()));
            }

            let mut chunk = [0u8; 4096];
            match self.source.read(&mut chunk) {
                Ok(0) => self.source_eof = true,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Non-blocking probe: can `next_record()` make progress without
    /// blocking?
    ///
    /// A true result is NOT a guarantee that a record exists — a closed pipe
    /// polls readable with nothing to deliver. The subsequent blocking read
    /// surfaces the real end-of-stream.
    pub fn has_record_available(&mut self) -> io::Result<bool> {
        if self.pending.contains(&self.delimiter) {
            return Ok(true);
        }
        if self.source_eof {
            // Only a final partial record can still be delivered.
            return Ok(!self.pending.is_empty());
        }
        let readable = poll_readable(self.source.as_raw_fd())?;
        if !readable && self.state == StreamState::Open {
            self.state = StreamState::Draining;
        }
        Ok(readable)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }
}

/// Zero-timeout `poll(2)` on a pipe read end.
///
/// POLLHUP (writer gone) counts as readable: a read will not block, it
/// returns EOF immediately, and that read is how closure is detected.
fn poll_readable(fd: RawFd) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        let rc = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0 && (pollfd.revents & (libc::POLLIN | libc::POLLHUP)) != 0);
    }
}
