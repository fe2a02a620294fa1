//! Reconnecting link transport
//!
//! Owns the background read loop for the bridge link. The loop blocks on
//! reads (with a short timeout so the stop flag is observed), hands every
//! complete line to the frame codec, and on any I/O error closes the port,
//! emits a disconnect, sleeps a fixed backoff and reconnects. The loop
//! never terminates on error; only `stop()` ends it.
//!
//! Decoded frames are handed off over a single-consumer mpsc channel so all
//! aggregator mutation stays on the consumer's thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::frame::{decode_line, Command, TelemetryFrame};

use super::channel::{LinkChannel, SerialChannel};
use super::serial::open_port;
use super::{
    LinkError, CONNECT_RETRY_SECS, DEFAULT_BAUD_RATE, MAX_LINE_BYTES, RECONNECT_BACKOFF_SECS,
    STOP_JOIN_TIMEOUT_SECS,
};

/// Events emitted by the transport to its single consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Link established
    Connected,
    /// Link lost (or a connection attempt failed); the transport keeps
    /// retrying on its own
    Disconnected,
    /// One decoded inbound telemetry frame
    Frame(TelemetryFrame),
}

/// Connection status owned by the transport.
#[derive(Debug, Clone, Default)]
pub struct LinkSession {
    /// Whether the link is currently up
    pub connected: bool,
    /// Connection attempts that have failed since start
    pub retries: u32,
    /// Most recent error message, if any
    pub last_error: Option<String>,
}

/// Produces a fresh channel for each (re)connection attempt.
pub type Connector = Box<dyn Fn() -> Result<Box<dyn LinkChannel>, LinkError> + Send + Sync>;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial port name (e.g. `/dev/ttyUSB0`)
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Backoff after an I/O error before reconnecting
    pub reconnect_backoff: Duration,
    /// Delay between failed connection attempts
    pub connect_retry_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            reconnect_backoff: Duration::from_secs(RECONNECT_BACKOFF_SECS),
            connect_retry_delay: Duration::from_secs(CONNECT_RETRY_SECS),
        }
    }
}

/// The reconnecting bridge link.
///
/// `start()` returns immediately; connectivity is only knowable through
/// [`LinkEvent::Connected`] / [`LinkEvent::Disconnected`] events and the
/// [`LinkSession`] accessor.
pub struct LinkTransport {
    config: LinkConfig,
    connector: Option<Connector>,
    running: Arc<AtomicBool>,
    session: Arc<Mutex<LinkSession>>,
    writer: Arc<Mutex<Option<Box<dyn LinkChannel>>>>,
    reader: Option<JoinHandle<()>>,
}

impl LinkTransport {
    /// Create a transport that opens the configured serial port.
    pub fn new(config: LinkConfig) -> Self {
        let port_name = config.port_name.clone();
        let baud = config.baud_rate;
        let connector: Connector = Box::new(move || {
            let port = open_port(&port_name, Some(baud))?;
            Ok(Box::new(SerialChannel::new(port)) as Box<dyn LinkChannel>)
        });
        Self::with_connector(config, connector)
    }

    /// Create a transport over an arbitrary channel source. Used by tests
    /// and by alternative carriers (e.g. a TCP bridge).
    pub fn with_connector(config: LinkConfig, connector: Connector) -> Self {
        Self {
            config,
            connector: Some(connector),
            running: Arc::new(AtomicBool::new(false)),
            session: Arc::new(Mutex::new(LinkSession::default())),
            writer: Arc::new(Mutex::new(None)),
            reader: None,
        }
    }

    /// Current session status.
    pub fn session(&self) -> LinkSession {
        lock(&self.session).clone()
    }

    /// Spawn the read loop. Events go to `events`; the receiver side is the
    /// single consumer that owns all telemetry state mutation.
    pub fn start(&mut self, events: Sender<LinkEvent>) {
        let Some(connector) = self.connector.take() else {
            tracing::warn!("link transport already started");
            return;
        };
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let session = Arc::clone(&self.session);
        let writer = Arc::clone(&self.writer);
        let config = self.config.clone();

        self.reader = Some(thread::spawn(move || {
            read_loop(&config, &connector, &running, &session, &writer, &events);
        }));
    }

    /// Send a command to the bridge. Best-effort: fails fast when no link
    /// is up or the write errors; never blocks beyond the port's write
    /// timeout. A failed send does not tear down the connection, the read
    /// loop owns that.
    pub fn send(&self, cmd: &Command) -> Result<(), LinkError> {
        let mut guard = lock(&self.writer);
        let Some(chan) = guard.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        let line = cmd.encode();
        if let Err(e) = chan.write_all(line.as_bytes()).and_then(|_| chan.flush()) {
            tracing::warn!("command send failed: {e}");
            lock(&self.session).last_error = Some(format!("send failed: {e}"));
            return Err(LinkError::Io(e));
        }
        Ok(())
    }

    /// Stop the read loop. The stop request takes effect at the top of the
    /// read-or-retry loop; the join is bounded, after which the underlying
    /// handle is force-dropped.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.reader.take() {
            let deadline = Instant::now() + Duration::from_secs(STOP_JOIN_TIMEOUT_SECS);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("read loop did not stop within bound; dropping port handle");
            }
        }

        *lock(&self.writer) = None;
        lock(&self.session).connected = false;
    }
}

impl Drop for LinkTransport {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_loop(
    config: &LinkConfig,
    connector: &Connector,
    running: &AtomicBool,
    session: &Mutex<LinkSession>,
    writer: &Mutex<Option<Box<dyn LinkChannel>>>,
    events: &Sender<LinkEvent>,
) {
    let mut chan: Option<Box<dyn LinkChannel>> = None;
    let mut line_buf: Vec<u8> = Vec::new();

    while running.load(Ordering::SeqCst) {
        let Some(active) = chan.as_mut() else {
            match connector() {
                Ok(c) => match c.try_clone_channel() {
                    Ok(write_half) => {
                        *lock(writer) = Some(write_half);
                        {
                            let mut s = lock(session);
                            s.connected = true;
                            s.last_error = None;
                        }
                        tracing::info!("bridge link established");
                        let _ = events.send(LinkEvent::Connected);
                        line_buf.clear();
                        chan = Some(c);
                    }
                    Err(e) => {
                        record_failure(session, format!("clone failed: {e}"));
                        let _ = events.send(LinkEvent::Disconnected);
                        sleep_while_running(config.connect_retry_delay, running);
                    }
                },
                Err(e) => {
                    tracing::debug!("connect failed ({}): {e}", config.port_name);
                    record_failure(session, e.to_string());
                    let _ = events.send(LinkEvent::Disconnected);
                    sleep_while_running(config.connect_retry_delay, running);
                }
            }
            continue;
        };

        let mut buf = [0u8; 512];
        match active.read(&mut buf) {
            Ok(0) => {
                // EOF: the device went away without an error.
                drop_connection(&mut chan, writer, session, events, "link closed");
                sleep_while_running(config.reconnect_backoff, running);
            }
            Ok(n) => {
                line_buf.extend_from_slice(&buf[..n]);
                drain_lines(&mut line_buf, events);
                if line_buf.len() > MAX_LINE_BYTES {
                    tracing::warn!("line buffer overflow, discarding {} bytes", line_buf.len());
                    line_buf.clear();
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                // Idle link; loop around and re-check the running flag.
            }
            Err(e) => {
                drop_connection(&mut chan, writer, session, events, &e.to_string());
                sleep_while_running(config.reconnect_backoff, running);
            }
        }
    }

    *lock(writer) = None;
}

/// Split completed lines out of the buffer and emit decoded frames.
/// Malformed lines are dropped silently.
fn drain_lines(line_buf: &mut Vec<u8>, events: &Sender<LinkEvent>) {
    while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = line_buf.drain(..=pos).collect();
        if let Ok(text) = std::str::from_utf8(&line) {
            if let Some(frame) = decode_line(text) {
                let _ = events.send(LinkEvent::Frame(frame));
            }
        }
    }
}

fn record_failure(session: &Mutex<LinkSession>, error: String) {
    let mut s = lock(session);
    s.connected = false;
    s.retries = s.retries.saturating_add(1);
    s.last_error = Some(error);
}

fn drop_connection(
    chan: &mut Option<Box<dyn LinkChannel>>,
    writer: &Mutex<Option<Box<dyn LinkChannel>>>,
    session: &Mutex<LinkSession>,
    events: &Sender<LinkEvent>,
    reason: &str,
) {
    tracing::warn!("bridge link lost: {reason}");
    *chan = None;
    *lock(writer) = None;
    {
        let mut s = lock(session);
        s.connected = false;
        s.last_error = Some(reason.to_string());
    }
    let _ = events.send(LinkEvent::Disconnected);
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20).min(total));
    }
}
