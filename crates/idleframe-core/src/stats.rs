//! Link counters
//!
//! Frame loss on a fault is accepted behaviour, so every fault is counted here
//! as well as logged.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a link's cumulative counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Bytes read from the transport
    pub bytes_received: u64,
    /// Bytes written to the transport
    pub bytes_sent: u64,
    /// Frames handed to a subscriber
    pub frames_emitted: u64,
    /// Frames completed while nobody was subscribed
    pub frames_dropped: u64,
    /// Accumulations discarded because they outgrew the buffer
    pub overflow_faults: u64,
    /// Accumulations discarded because of a short read
    pub short_read_faults: u64,
    /// Hard transport errors
    pub io_faults: u64,
    /// Writes skipped because the link was closed
    pub writes_ignored: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) bytes_received: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) frames_emitted: AtomicU64,
    pub(crate) frames_dropped: AtomicU64,
    pub(crate) overflow_faults: AtomicU64,
    pub(crate) short_read_faults: AtomicU64,
    pub(crate) io_faults: AtomicU64,
    pub(crate) writes_ignored: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LinkStats {
        LinkStats {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            overflow_faults: self.overflow_faults.load(Ordering::Relaxed),
            short_read_faults: self.short_read_faults.load(Ordering::Relaxed),
            io_faults: self.io_faults.load(Ordering::Relaxed),
            writes_ignored: self.writes_ignored.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_bumps() {
        let counters = Counters::default();
        Counters::bump(&counters.bytes_received, 5);
        Counters::bump(&counters.bytes_received, 3);
        Counters::bump(&counters.overflow_faults, 1);

        let stats = counters.snapshot();
        assert_eq!(stats.bytes_received, 8);
        assert_eq!(stats.overflow_faults, 1);
        assert_eq!(stats.frames_emitted, 0);
    }
}
