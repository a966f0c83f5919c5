//! Serial link
//!
//! Ties a transport to the framing core. Opening a link starts two threads:
//! a reader that polls the transport and runs the arrival handler, and (in
//! timeout mode) the timeout watcher. Closing stops both before returning;
//! a close that races another one waits for the first to finish.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::clock::{Clock, MonotonicClock};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::framing::{Arrival, FrameEmitter, Framer, ReceivedFrame, TimeoutWatcher, WATCHER_POLL_INTERVAL};
use crate::stats::{Counters, LinkStats};
use crate::transport::{hex_string, Connector, SerialConnector, Transport};

/// How long the reader sleeps when nothing is waiting
const DATA_POLL_INTERVAL: Duration = Duration::from_millis(2);

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

fn lock_transport(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn Transport>> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Join a thread unless it is the one asking
fn join_unless_current(handle: JoinHandle<()>, port: &str) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!(port, "link thread panicked");
    }
}

/// Reader thread: polls the transport and feeds the framer
struct Reader {
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Reader {
    fn spawn(
        transport: SharedTransport,
        framer: Arc<Framer>,
        counters: Arc<Counters>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let (thread_stop, thread_alive) = (stop.clone(), alive.clone());
        let handle = thread::Builder::new()
            .name(format!("idleframe-rx {}", framer.source()))
            .spawn(move || {
                run_reader(&transport, &framer, &counters, &thread_stop);
                thread_alive.store(false, Ordering::Release);
            })?;
        Ok(Self {
            stop,
            alive,
            handle,
        })
    }

    fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn stop(self, port: &str) {
        self.stop.store(true, Ordering::Release);
        join_unless_current(self.handle, port);
    }
}

fn run_reader(
    transport: &SharedTransport,
    framer: &Framer,
    counters: &Counters,
    stop: &AtomicBool,
) {
    let port = framer.source();
    tracing::trace!(port, "reader started");

    while !stop.load(Ordering::Acquire) {
        let arrival = {
            let mut transport = lock_transport(transport);
            match transport.bytes_to_read() {
                Ok(0) => None,
                Ok(_) => Some(framer.on_data_available(transport.as_mut())),
                Err(e) => Some(Err(LinkError::from(e))),
            }
        };

        match arrival {
            None => thread::sleep(DATA_POLL_INTERVAL),
            Some(Ok(Arrival::Buffered(_))) => {}
            Some(Ok(Arrival::Frame(frame))) => framer.emit(frame),
            // Already counted and logged by the framer
            Some(Err(e)) if e.is_frame_fault() => {}
            Some(Err(e)) => {
                Counters::bump(&counters.io_faults, 1);
                let discarded = framer.abandon();
                tracing::error!(port, discarded, "transport failed, reader stopping: {e}");
                break;
            }
        }
    }

    tracing::trace!(port, "reader stopped");
}

/// Everything that exists only while the link is open
struct Session {
    transport: SharedTransport,
    framer: Arc<Framer>,
    reader: Reader,
    watcher: Option<TimeoutWatcher>,
}

impl Session {
    /// Threads owned by this session. They run subscriber code, so they may
    /// call back into the link while it is being closed.
    fn workers(&self) -> Vec<ThreadId> {
        let mut workers = vec![self.reader.thread_id()];
        workers.extend(self.watcher.as_ref().and_then(TimeoutWatcher::thread_id));
        workers
    }

    fn shutdown(self, config: &LinkConfig) {
        let port = config.port.port_name.as_str();

        // No arrivals from here on
        self.reader.stop(port);
        drop(self.transport);

        if let Some(watcher) = self.watcher {
            // Give a frame that is still assembling the chance to complete
            let grace = config.receive_timeout() + WATCHER_POLL_INTERVAL;
            if !self.framer.drain(grace) {
                tracing::debug!(port, "pending frame abandoned on close");
            }
            watcher.stop();
        } else {
            self.framer.cancel();
        }
    }
}

enum LinkState {
    Closed,
    Open(Session),
    /// Shutdown in progress; `workers` are the threads being stopped
    Closing { workers: Vec<ThreadId> },
}

impl LinkState {
    fn session(&self) -> Option<&Session> {
        match self {
            LinkState::Open(session) => Some(session),
            _ => None,
        }
    }
}

/// A serial port that delivers inactivity-delimited frames.
///
/// All methods take `&self`; the link can be shared between threads and used
/// from inside its own frame handler.
pub struct SerialLink {
    config: RwLock<LinkConfig>,
    connector: Box<dyn Connector>,
    clock: Arc<dyn Clock>,
    emitter: Arc<FrameEmitter>,
    counters: Arc<Counters>,
    state: Mutex<LinkState>,
    /// Signalled when a shutdown completes
    settled: Condvar,
}

impl SerialLink {
    /// Create a closed link to a real serial port
    pub fn new(config: LinkConfig) -> Self {
        Self::with_connector(config, SerialConnector)
    }

    /// Create a closed link that opens its transport through `connector`
    pub fn with_connector(config: LinkConfig, connector: impl Connector + 'static) -> Self {
        Self {
            config: RwLock::new(config),
            connector: Box::new(connector),
            clock: Arc::new(MonotonicClock::new()),
            emitter: Arc::new(FrameEmitter::new()),
            counters: Arc::new(Counters::default()),
            state: Mutex::new(LinkState::Closed),
            settled: Condvar::new(),
        }
    }

    /// Replace the clock used to stamp arrivals
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state once no shutdown is in progress. A link thread asking
    /// gets the `Closing` state back instead of waiting on its own join.
    fn settled_state(&self) -> MutexGuard<'_, LinkState> {
        let mut state = self.state();
        while matches!(
            &*state,
            LinkState::Closing { workers } if !workers.contains(&thread::current().id())
        ) {
            state = self
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    /// Current configuration
    pub fn config(&self) -> LinkConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Port name, which is also the source identity passed to subscribers
    pub fn port_name(&self) -> String {
        self.config().port.port_name
    }

    /// Replace the configuration. Only allowed while the link is closed.
    pub fn set_config(&self, config: LinkConfig) -> Result<(), LinkError> {
        let state = self.settled_state();
        if !matches!(*state, LinkState::Closed) {
            return Err(LinkError::AlreadyOpen);
        }
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    /// Open the port and start assembling frames.
    ///
    /// Waits for a close in progress on another thread to finish first.
    pub fn open(&self) -> Result<(), LinkError> {
        let mut state = self.settled_state();
        if !matches!(*state, LinkState::Closed) {
            return Err(LinkError::AlreadyOpen);
        }

        let config = self.config();
        config.validate()?;
        let port = config.port.port_name.as_str();

        tracing::info!(
            port,
            baud = config.port.baud_rate,
            timeout_ms = config.receive_timeout_ms,
            timeout_enabled = config.timeout_enabled,
            "opening link"
        );

        let transport = self.connector.connect(&config.port).map_err(|e| {
            tracing::warn!(port, "open failed: {e}");
            e
        })?;
        let transport: SharedTransport = Arc::new(Mutex::new(transport));

        let framer = Arc::new(Framer::new(
            &config,
            self.clock.clone(),
            self.emitter.clone(),
            self.counters.clone(),
        ));

        let watcher = if config.timeout_enabled {
            Some(TimeoutWatcher::spawn(framer.clone())?)
        } else {
            None
        };

        let reader = match Reader::spawn(transport.clone(), framer.clone(), self.counters.clone()) {
            Ok(reader) => reader,
            Err(e) => {
                if let Some(watcher) = watcher {
                    watcher.stop();
                }
                return Err(e.into());
            }
        };

        *state = LinkState::Open(Session {
            transport,
            framer,
            reader,
            watcher,
        });
        Ok(())
    }

    /// Close the port. Safe to call when already closed.
    ///
    /// A frame still being assembled gets up to one receive timeout to
    /// complete; once this returns no further frames are delivered. A
    /// concurrent close blocks until the first one has finished, except when
    /// called from a subscriber running on the link's own threads.
    pub fn close(&self) {
        let session = {
            let mut state = self.settled_state();
            match std::mem::replace(&mut *state, LinkState::Closed) {
                LinkState::Open(session) => {
                    *state = LinkState::Closing {
                        workers: session.workers(),
                    };
                    session
                }
                LinkState::Closed => {
                    tracing::trace!("close: link already closed");
                    return;
                }
                closing @ LinkState::Closing { .. } => {
                    // Called from a link thread; the outer close finishes the job
                    *state = closing;
                    return;
                }
            }
        };

        let config = self.config();
        session.shutdown(&config);

        *self.state() = LinkState::Closed;
        self.settled.notify_all();
        tracing::info!(port = %config.port.port_name, "link closed");
    }

    /// Whether the link is open and its transport still healthy
    pub fn is_open(&self) -> bool {
        self.state()
            .session()
            .is_some_and(|session| session.reader.is_alive())
    }

    /// Install the frame handler, replacing any previous one.
    /// Returns `true` if a handler was replaced.
    pub fn subscribe<F>(&self, handler: F) -> bool
    where
        F: Fn(&str, Vec<u8>) + Send + Sync + 'static,
    {
        self.emitter.subscribe(handler)
    }

    /// Remove the frame handler. Frames completed afterwards are dropped.
    pub fn unsubscribe(&self) -> bool {
        self.emitter.unsubscribe()
    }

    /// Subscribe with a channel, for async consumers
    pub fn frames(&self) -> UnboundedReceiver<ReceivedFrame> {
        self.emitter.channel()
    }

    /// Counters since the link was created
    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    /// Bytes accumulated towards the next frame
    pub fn pending_len(&self) -> usize {
        self.state()
            .session()
            .map_or(0, |session| session.framer.pending_len())
    }

    fn open_transport(&self) -> Option<SharedTransport> {
        self.state()
            .session()
            .filter(|session| session.reader.is_alive())
            .map(|session| session.transport.clone())
    }

    /// Write raw bytes. Skipped without error when the link is closed.
    pub fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let Some(transport) = self.open_transport() else {
            Counters::bump(&self.counters.writes_ignored, 1);
            tracing::trace!(len = bytes.len(), "write ignored: link closed");
            return Ok(());
        };

        let mut transport = lock_transport(&transport);
        transport.write_all(bytes)?;
        transport.flush()?;
        Counters::bump(&self.counters.bytes_sent, bytes.len() as u64);
        tracing::trace!("tx {}", hex_string(bytes));
        Ok(())
    }

    /// Write text without a line terminator
    pub fn write_str(&self, text: &str) -> Result<(), LinkError> {
        self.write(text.as_bytes())
    }

    /// Write text followed by `\n`
    pub fn write_line(&self, text: &str) -> Result<(), LinkError> {
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        self.write(&line)
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port_name())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
