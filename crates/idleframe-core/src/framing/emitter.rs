//! Frame delivery
//!
//! Zero or one subscriber per link. Dispatch clones the handler reference under
//! a read lock and calls it after the lock is released, so a handler may
//! subscribe, unsubscribe or write to the link without deadlocking.

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Frame callback: source identity (port name) and the frame bytes
pub type FrameHandler = dyn Fn(&str, Vec<u8>) + Send + Sync;

/// A frame together with the port it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Port name of the originating link
    pub source: String,
    /// Frame contents
    pub bytes: Vec<u8>,
}

/// Single-subscriber frame emitter
#[derive(Default)]
pub struct FrameEmitter {
    handler: RwLock<Option<Arc<FrameHandler>>>,
}

impl std::fmt::Debug for FrameEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEmitter")
            .field("subscribed", &self.has_subscriber())
            .finish()
    }
}

impl FrameEmitter {
    /// Create an emitter with no subscriber
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing any previous subscriber.
    /// Returns `true` if a subscriber was replaced.
    pub fn subscribe<F>(&self, handler: F) -> bool
    where
        F: Fn(&str, Vec<u8>) + Send + Sync + 'static,
    {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(Arc::new(handler)).is_some()
    }

    /// Remove the subscriber. Returns `true` if there was one.
    pub fn unsubscribe(&self) -> bool {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        slot.take().is_some()
    }

    /// Whether a subscriber is installed
    pub fn has_subscriber(&self) -> bool {
        self.handler
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Subscribe with a channel and return its receiving end
    pub fn channel(&self) -> UnboundedReceiver<ReceivedFrame> {
        let (tx, rx) = unbounded_channel();
        self.subscribe(move |source, bytes| {
            // Receiver dropped: nobody is listening any more
            let _ = tx.send(ReceivedFrame {
                source: source.to_string(),
                bytes,
            });
        });
        rx
    }

    /// Deliver a frame on the calling thread.
    /// Returns `false` if there was no subscriber and the frame was dropped.
    pub fn emit(&self, source: &str, frame: Vec<u8>) -> bool {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => {
                handler(source, frame);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_without_subscriber_drops() {
        let emitter = FrameEmitter::new();
        assert!(!emitter.has_subscriber());
        assert!(!emitter.emit("COM1", b"lost".to_vec()));
    }

    #[test]
    fn test_subscriber_receives_source_and_bytes() {
        let emitter = FrameEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        emitter.subscribe(move |source, bytes| {
            sink.lock().unwrap().push((source.to_string(), bytes));
        });

        assert!(emitter.emit("/dev/ttyUSB0", b"ABCD".to_vec()));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("/dev/ttyUSB0".to_string(), b"ABCD".to_vec())]
        );
    }

    #[test]
    fn test_subscribe_replaces_and_unsubscribe_clears() {
        let emitter = FrameEmitter::new();
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));

        let f = first.clone();
        assert!(!emitter.subscribe(move |_, _| *f.lock().unwrap() += 1));
        let s = second.clone();
        assert!(emitter.subscribe(move |_, _| *s.lock().unwrap() += 1));

        emitter.emit("p", vec![1]);
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);

        assert!(emitter.unsubscribe());
        assert!(!emitter.unsubscribe());
        assert!(!emitter.emit("p", vec![2]));
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let emitter = Arc::new(FrameEmitter::new());
        let inner = emitter.clone();
        emitter.subscribe(move |_, _| {
            inner.unsubscribe();
        });
        assert!(emitter.emit("p", vec![0]));
        assert!(!emitter.has_subscriber());
    }

    #[test]
    fn test_channel_forwards_frames() {
        let emitter = FrameEmitter::new();
        let mut rx = emitter.channel();
        emitter.emit("COM4", b"XY".to_vec());
        assert_eq!(
            rx.try_recv().unwrap(),
            ReceivedFrame {
                source: "COM4".to_string(),
                bytes: b"XY".to_vec()
            }
        );
    }
}
