//! Inactivity-timeout frame assembly
//!
//! A [`Framer`] is the per-open state of a link: the frame buffer, the
//! last-activity stamp and the watcher flags under one mutex, plus a condvar
//! the timeout watcher sleeps on. The arrival handler (`arrival.rs`) feeds it
//! from the reader thread, the watcher (`watcher.rs`) drains it from its own
//! thread.

mod arrival;
mod assembler;
pub mod buffer;
pub mod emitter;
mod watcher;

pub use buffer::FrameBuffer;
pub use emitter::{FrameEmitter, FrameHandler, ReceivedFrame};

pub(crate) use arrival::Arrival;
pub(crate) use watcher::{TimeoutWatcher, WATCHER_POLL_INTERVAL};

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::LinkConfig;
use crate::stats::Counters;
use assembler::Assembly;

pub(crate) struct Framer {
    source: String,
    receive_timeout_ms: u64,
    timeout_enabled: bool,
    assembly: Mutex<Assembly>,
    /// Signalled on arm, on fire and on cancel
    changed: Condvar,
    clock: Arc<dyn Clock>,
    emitter: Arc<FrameEmitter>,
    counters: Arc<Counters>,
}

impl Framer {
    pub(crate) fn new(
        config: &LinkConfig,
        clock: Arc<dyn Clock>,
        emitter: Arc<FrameEmitter>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            source: config.port.port_name.clone(),
            receive_timeout_ms: config.receive_timeout_ms,
            timeout_enabled: config.timeout_enabled,
            assembly: Mutex::new(Assembly::new(config.buffer_capacity)),
            changed: Condvar::new(),
            clock,
            emitter,
            counters,
        }
    }

    fn assembly(&self) -> MutexGuard<'_, Assembly> {
        self.assembly.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    /// Bytes accumulated towards the next frame
    pub(crate) fn pending_len(&self) -> usize {
        self.assembly().len()
    }

    /// Hand a completed frame to the subscriber
    pub(crate) fn emit(&self, frame: Vec<u8>) {
        let len = frame.len();
        if self.emitter.emit(&self.source, frame) {
            Counters::bump(&self.counters.frames_emitted, 1);
            tracing::debug!(port = %self.source, len, "frame emitted");
        } else {
            Counters::bump(&self.counters.frames_dropped, 1);
            tracing::trace!(port = %self.source, len, "frame dropped: no subscriber");
        }
    }

    /// Discard the accumulation and disarm the watcher
    pub(crate) fn abandon(&self) -> usize {
        let discarded = self.assembly().abandon();
        self.changed.notify_all();
        discarded
    }

    /// Wait for an armed watcher to finish its cycle, at most `max_wait`.
    /// Returns `false` if the accumulation was still pending at the deadline.
    pub(crate) fn drain(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut assembly = self.assembly();
        while assembly.is_armed() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            assembly = match self.changed.wait_timeout(assembly, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Stop the watcher for good and clear any accumulation
    pub(crate) fn cancel(&self) {
        let discarded = self.assembly().cancel();
        self.changed.notify_all();
        if discarded > 0 {
            tracing::debug!(port = %self.source, discarded, "pending bytes discarded on close");
        }
    }
}
