//! Byte-stream endpoints the source stage reads from and writes to
//!
//! A [`Transport`] only has to read with a timeout, write, and close.
//! [`SerialTransport`] talks to a real device through the `serialport` crate;
//! [`MockTransport`] plays back a script for tests and dry runs.

pub mod mock;
pub mod serial;

use std::io;

pub use mock::{MockHandle, MockRead, MockTransport};
pub use serial::{
    FlowControl, Parity, SerialConfig, SerialTransport, describe_port_type, list_ports,
};

/// Error opening or enumerating a transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open '{device}': {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("Invalid serial configuration: {0}")]
    InvalidConfig(String),
}

/// A bidirectional byte stream with a read timeout
pub trait Transport: Send {
    /// Short description used in log lines
    fn describe(&self) -> String;

    /// Read up to `buf.len()` bytes. Returns `Ok(0)` when the read timed out
    /// with no data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some of `data`, returning how many bytes were accepted
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Write the whole buffer
    fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ));
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Release the device. Further reads and writes fail with `NotConnected`.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// True for read errors that mean "no data yet" rather than a fault
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

pub(crate) fn not_connected(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{} is closed", what))
}
