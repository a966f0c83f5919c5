//! Timeout watcher
//!
//! One thread per open link. While disarmed it blocks on the framer's condvar;
//! once an arrival arms it, it checks the inter-byte gap every
//! [`WATCHER_POLL_INTERVAL`] and emits the accumulation when the gap exceeds
//! the receive timeout. The lock is only held for the check and the take, and
//! the frame is emitted after it is released.

use std::io;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use super::Framer;

/// How often an armed watcher checks the gap
pub(crate) const WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(16);

pub(crate) struct TimeoutWatcher {
    framer: Arc<Framer>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutWatcher {
    pub(crate) fn spawn(framer: Arc<Framer>) -> io::Result<Self> {
        let worker = framer.clone();
        let handle = thread::Builder::new()
            .name(format!("idleframe-watch {}", framer.source()))
            .spawn(move || worker.watch())?;
        Ok(Self {
            framer,
            handle: Some(handle),
        })
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|handle| handle.thread().id())
    }

    /// Cancel the watcher and wait for its thread to exit.
    ///
    /// When called from the watcher thread itself (a subscriber closing the
    /// link) the thread exits on its own once the handler returns.
    pub(crate) fn stop(mut self) {
        self.framer.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(port = %self.framer.source(), "timeout watcher panicked");
            }
        }
    }
}

impl Drop for TimeoutWatcher {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.framer.cancel();
        }
    }
}

impl Framer {
    fn watch(&self) {
        tracing::trace!(port = %self.source, "timeout watcher started");
        let mut assembly = self.assembly();
        loop {
            if assembly.is_cancelled() {
                break;
            }

            if !assembly.is_armed() {
                assembly = self
                    .changed
                    .wait(assembly)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            if let Some(frame) = assembly.expire(self.clock.now_ms(), self.receive_timeout_ms) {
                drop(assembly);
                self.changed.notify_all();
                self.emit(frame);
                assembly = self.assembly();
                continue;
            }

            assembly = match self.changed.wait_timeout(assembly, WATCHER_POLL_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        tracing::trace!(port = %self.source, "timeout watcher stopped");
    }
}
