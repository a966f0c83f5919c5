//! Frame assembly state
//!
//! The buffer, the last-activity stamp and the watcher flags change together,
//! so they live in one struct behind one mutex. Nothing here knows about
//! threads or transports; callers pass the current time in.

use super::buffer::FrameBuffer;
use crate::error::LinkError;

#[derive(Debug)]
pub(crate) struct Assembly {
    buffer: FrameBuffer,
    last_activity_ms: u64,
    /// The watcher is in a polling cycle for the current accumulation
    armed: bool,
    /// The watcher must exit
    cancelled: bool,
}

impl Assembly {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: FrameBuffer::with_capacity(capacity),
            last_activity_ms: 0,
            armed: false,
            cancelled: false,
        }
    }

    /// Append an arrival and stamp it.
    ///
    /// Returns `true` when this arrival armed the watcher. On overflow the
    /// accumulation is gone and the watcher is disarmed.
    pub(crate) fn accept(&mut self, bytes: &[u8], now_ms: u64) -> Result<bool, LinkError> {
        if let Err(err) = self.buffer.append(bytes) {
            self.armed = false;
            return Err(err);
        }
        self.last_activity_ms = now_ms;
        if self.armed {
            Ok(false)
        } else {
            self.armed = true;
            Ok(true)
        }
    }

    /// Take the accumulation if the gap since the last arrival exceeds
    /// `timeout_ms`, disarming the watcher.
    pub(crate) fn expire(&mut self, now_ms: u64, timeout_ms: u64) -> Option<Vec<u8>> {
        if !self.armed || now_ms.saturating_sub(self.last_activity_ms) <= timeout_ms {
            return None;
        }
        self.armed = false;
        Some(self.buffer.take())
    }

    /// Drop the accumulation and disarm. Returns the number of bytes discarded.
    pub(crate) fn abandon(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.reset();
        self.armed = false;
        discarded
    }

    /// Abandon and tell the watcher to exit
    pub(crate) fn cancel(&mut self) -> usize {
        self.cancelled = true;
        self.abandon()
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }
}
