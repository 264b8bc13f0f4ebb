// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded output buffer between the job executor and the log streamer.
//!
//! The executor's stdout and stderr are appended here by the supervisor's
//! pipe readers; the log streamer drains it with [`OutputBuffer::read_and_truncate`].
//! Closing the buffer makes further writes fail like a broken pipe, which
//! is how backpressure ultimately reaches the subprocess.

use parking_lot::Mutex;
use thiserror::Error;

/// Hard cap on bytes held between drains.
pub const MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("write on closed output buffer")]
    Closed,

    #[error("output buffer is over its {MAX_BUFFERED_BYTES}-byte cap")]
    Full,
}

#[derive(Default)]
struct Inner {
    data: Vec<u8>,
    /// Logical offset of `data[0]` in the job's full output history.
    read_offset: u64,
    closed: bool,
}

/// Append-only byte buffer with a single read-and-truncate operation.
#[derive(Default)]
pub struct OutputBuffer {
    inner: Mutex<Inner>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` whole. Writes after [`close`](Self::close) fail,
    /// and writes that would exceed the cap fail; partial writes never
    /// happen.
    pub fn write(&self, bytes: &[u8]) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(BufferError::Closed);
        }
        if inner.data.len() + bytes.len() > MAX_BUFFERED_BYTES {
            return Err(BufferError::Full);
        }
        inner.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Idempotent. After closing, the supervisor's pipe readers stop and
    /// drop their read ends, so the subprocess takes SIGPIPE on its next
    /// write.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Take every byte written since the previous call, with the logical
    /// offset of the first returned byte. Atomic and non-blocking; an
    /// empty buffer returns an empty slice at the current offset.
    pub fn read_and_truncate(&self) -> (u64, Vec<u8>) {
        let mut inner = self.inner.lock();
        let offset = inner.read_offset;
        let bytes = std::mem::take(&mut inner.data);
        inner.read_offset = offset + bytes.len() as u64;
        (offset, bytes)
    }

    /// Total bytes ever written, drained or not.
    pub fn total_written(&self) -> u64 {
        let inner = self.inner.lock();
        inner.read_offset + inner.data.len() as u64
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
