//! Communication channel abstraction
//!
//! Seam between the transport's read/reconnect loop and the actual byte
//! stream, so tests (and alternative carriers) can stand in for a serial
//! port.

use std::io::{self, Read, Write};

use serialport::SerialPort;

/// A duplex byte stream to the bridge controller.
///
/// Reads are expected to time out periodically (rather than block forever)
/// so the read loop can observe its stop flag.
pub trait LinkChannel: Read + Write + Send {
    /// Clone the channel so one half can read while the other writes.
    fn try_clone_channel(&self) -> io::Result<Box<dyn LinkChannel>>;
}

/// Serial port implementation of [`LinkChannel`].
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an open serial port.
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl LinkChannel for SerialChannel {
    fn try_clone_channel(&self) -> io::Result<Box<dyn LinkChannel>> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}
