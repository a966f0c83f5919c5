//! Arrival handling
//!
//! Called by the reader whenever the transport reports bytes waiting. In
//! timeout mode the bytes join the accumulation and the watcher is armed; in
//! pass-through mode they come back as a frame of their own.

use std::io::{self, ErrorKind};

use super::Framer;
use crate::error::LinkError;
use crate::stats::Counters;
use crate::transport::Transport;

/// What an arrival produced
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Arrival {
    /// Bytes appended to the accumulation
    Buffered(usize),
    /// Pass-through frame, to be emitted once the transport is released
    Frame(Vec<u8>),
}

/// A read that times out or would block delivered nothing
fn read_some(transport: &mut dyn Transport, buf: &mut [u8]) -> io::Result<usize> {
    match transport.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
        Err(e) => Err(e),
    }
}

impl Framer {
    /// Drain what the transport has available
    pub(crate) fn on_data_available(
        &self,
        transport: &mut dyn Transport,
    ) -> Result<Arrival, LinkError> {
        if self.timeout_enabled {
            self.accumulate(transport).map(Arrival::Buffered)
        } else {
            match self.pass_through(transport)? {
                Some(frame) => Ok(Arrival::Frame(frame)),
                None => Ok(Arrival::Buffered(0)),
            }
        }
    }

    fn accumulate(&self, transport: &mut dyn Transport) -> Result<usize, LinkError> {
        let mut total = 0;
        let mut chunk = Vec::new();

        loop {
            let reported = transport.bytes_to_read()?;
            if reported == 0 {
                break;
            }

            chunk.resize(reported, 0);
            let read = read_some(transport, &mut chunk)?;
            Counters::bump(&self.counters.bytes_received, read as u64);
            if read != reported {
                let discarded = self.abandon();
                Counters::bump(&self.counters.short_read_faults, 1);
                tracing::warn!(
                    port = %self.source,
                    reported,
                    read,
                    discarded,
                    "short read, frame discarded"
                );
                return Err(LinkError::ShortRead { reported, read });
            }

            let accepted = self.assembly().accept(&chunk, self.clock.now_ms());
            let armed = match accepted {
                Ok(armed) => armed,
                Err(err) => {
                    self.changed.notify_all();
                    Counters::bump(&self.counters.overflow_faults, 1);
                    tracing::warn!(port = %self.source, "{err}, frame discarded");
                    return Err(err);
                }
            };
            total += read;

            if armed {
                self.changed.notify_all();
                tracing::trace!(port = %self.source, "timeout watcher armed");
            }
        }

        Ok(total)
    }

    fn pass_through(&self, transport: &mut dyn Transport) -> Result<Option<Vec<u8>>, LinkError> {
        let reported = transport.bytes_to_read()?;
        if reported == 0 {
            return Ok(None);
        }

        let mut frame = vec![0u8; reported];
        let mut filled = 0;
        while filled < reported {
            let n = read_some(transport, &mut frame[filled..])?;
            if n == 0 {
                Counters::bump(&self.counters.bytes_received, filled as u64);
                Counters::bump(&self.counters.short_read_faults, 1);
                self.abandon();
                tracing::warn!(
                    port = %self.source,
                    reported,
                    read = filled,
                    "short read, pass-through frame discarded"
                );
                return Err(LinkError::ShortRead {
                    reported,
                    read: filled,
                });
            }
            filled += n;
        }

        Counters::bump(&self.counters.bytes_received, reported as u64);
        self.abandon();
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LinkConfig;
    use crate::framing::FrameEmitter;
    use crate::transport::{SimulatedConnector, SimulatedPort};
    use crate::Connector;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn setup(config: LinkConfig) -> (Framer, SimulatedPort, Box<dyn Transport>, Arc<Counters>) {
        let port = SimulatedPort::new();
        let transport = SimulatedConnector::new(port.clone())
            .connect(&config.port)
            .unwrap();
        let counters = Arc::new(Counters::default());
        let framer = Framer::new(
            &config,
            Arc::new(ManualClock::new(0)),
            Arc::new(FrameEmitter::new()),
            counters.clone(),
        );
        (framer, port, transport, counters)
    }

    #[test]
    fn test_timeout_mode_buffers_and_arms() {
        let (framer, port, mut transport, counters) = setup(LinkConfig::for_port("COM1"));
        port.inject(b"AB");
        assert_eq!(
            framer.on_data_available(transport.as_mut()).unwrap(),
            Arrival::Buffered(2)
        );
        port.inject(b"CD");
        framer.on_data_available(transport.as_mut()).unwrap();

        assert_eq!(framer.pending_len(), 4);
        assert!(framer.assembly().is_armed());
        assert_eq!(counters.snapshot().bytes_received, 4);
    }

    #[test]
    fn test_overflow_discards_and_counts() {
        let mut config = LinkConfig::for_port("COM1");
        config.buffer_capacity = 4;
        let (framer, port, mut transport, counters) = setup(config);

        port.inject(b"ABCDE");
        let err = framer.on_data_available(transport.as_mut()).unwrap_err();
        assert!(matches!(err, LinkError::Overflow { capacity: 4, attempted: 5 }));
        assert_eq!(framer.pending_len(), 0);
        assert!(!framer.assembly().is_armed());
        assert_eq!(counters.snapshot().overflow_faults, 1);

        // The link keeps assembling afterwards
        port.inject(b"OK");
        framer.on_data_available(transport.as_mut()).unwrap();
        assert_eq!(framer.pending_len(), 2);
    }

    #[test]
    fn test_short_read_discards_accumulation() {
        let (framer, port, mut transport, counters) = setup(LinkConfig::for_port("COM1"));
        port.inject(b"AB");
        framer.on_data_available(transport.as_mut()).unwrap();

        port.inject(b"CDE");
        port.short_read_next();
        let err = framer.on_data_available(transport.as_mut()).unwrap_err();
        assert!(matches!(err, LinkError::ShortRead { reported: 3, read: 2 }));
        assert_eq!(framer.pending_len(), 0);
        assert_eq!(counters.snapshot().short_read_faults, 1);
    }

    #[test]
    fn test_pass_through_returns_each_arrival() {
        let mut config = LinkConfig::for_port("COM1");
        config.timeout_enabled = false;
        let (framer, port, mut transport, _) = setup(config);

        port.inject(b"XY");
        assert_eq!(
            framer.on_data_available(transport.as_mut()).unwrap(),
            Arrival::Frame(b"XY".to_vec())
        );
        port.inject(b"Z");
        assert_eq!(
            framer.on_data_available(transport.as_mut()).unwrap(),
            Arrival::Frame(b"Z".to_vec())
        );
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_pass_through_keeps_reading_after_partial_read() {
        let mut config = LinkConfig::for_port("COM1");
        config.timeout_enabled = false;
        let (framer, port, mut transport, _) = setup(config);

        port.inject(b"HELLO");
        port.short_read_next();
        assert_eq!(
            framer.on_data_available(transport.as_mut()).unwrap(),
            Arrival::Frame(b"HELLO".to_vec())
        );
    }

    #[test]
    fn test_nothing_available() {
        let (framer, _port, mut transport, _) = setup(LinkConfig::for_port("COM1"));
        assert_eq!(
            framer.on_data_available(transport.as_mut()).unwrap(),
            Arrival::Buffered(0)
        );
        assert!(!framer.assembly().is_armed());
    }
}
