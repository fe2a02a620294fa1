//! Vehicle link transport
//!
//! Duplex byte-stream connection to the bridge controller over USB serial.
//! The transport owns a background read loop that self-heals across
//! unplugs and power cycles: on any I/O error it closes the port, waits a
//! fixed backoff, and reconnects, forever, until told to stop.

mod channel;
mod serial;
mod transport;

pub use channel::{LinkChannel, SerialChannel};
pub use serial::{list_ports, open_port};
pub use transport::{Connector, LinkConfig, LinkEvent, LinkSession, LinkTransport};

use thiserror::Error;

/// Default baud rate for the bridge link.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial read timeout. Short enough that the read loop re-checks its
/// running flag promptly.
pub const READ_TIMEOUT_MS: u64 = 200;

/// Backoff after an I/O error before reconnecting, seconds.
pub const RECONNECT_BACKOFF_SECS: u64 = 2;

/// Delay between failed connection attempts, seconds.
pub const CONNECT_RETRY_SECS: u64 = 3;

/// Bound on waiting for the read loop to exit during `stop()`, after which
/// the port handle is force-dropped.
pub const STOP_JOIN_TIMEOUT_SECS: u64 = 2;

/// Cap on the inbound line buffer. Garbage without newlines must not grow
/// memory unboundedly; the buffer is cleared when the cap is hit.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Errors from the link transport.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Serial port layer failure
    #[error("serial port error: {0}")]
    Serial(String),

    /// No active connection to write to
    #[error("not connected to bridge")]
    NotConnected,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
