//! # Serial Communication Module
//!
//! Transport boundary between the link engine and the ELRS transmitter
//! module.
//!
//! This module handles:
//! - Opening the serial device at the requested baud rate (8N1, no flow control)
//! - Splitting the device into an async read half and a write half
//! - Letting tests substitute an in-memory transport

pub mod port_trait;

use std::fmt;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::error::{ElrsLinkError, Result};
use port_trait::{AsyncWritePort, SerialPortIO};

/// Read side of an open port
pub type PortReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write side of an open port
pub type PortWriter = Box<dyn SerialPortIO>;

/// Lifecycle of the transport connection as seen by the link supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Unknown,
    Opening,
    Connected,
    Closed,
    Failed,
}

/// Something that can open a named port at a baud rate
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync + 'static {
    fn open(&self, name: &str, baud_rate: u32) -> Result<Port>;
}

/// An open port, split so the send and receive loops can own one side each
pub struct Port {
    name: String,
    baud_rate: u32,
    reader: PortReader,
    writer: PortWriter,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl Port {
    pub fn new(name: &str, baud_rate: u32, reader: PortReader, writer: PortWriter) -> Self {
        Self {
            name: name.to_string(),
            baud_rate,
            reader,
            writer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn into_parts(self) -> (PortReader, PortWriter) {
        (self.reader, self.writer)
    }
}

/// Real serial devices via `tokio-serial`
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialTransport;

impl SerialTransport {
    /// Open a specific serial port with CRSF settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        use tokio_serial::SerialPortBuilderExt;

        debug!("Trying to open serial port: {} @ {}", path, baud_rate);

        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ElrsLinkError::Port(format!("Failed to open {}: {}", path, e)))
    }
}

impl Transport for SerialTransport {
    /// # Examples
    ///
    /// ```no_run
    /// use elrs_link::serial::{SerialTransport, Transport};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let port = SerialTransport.open("/dev/ttyACM0", 921_600)?;
    ///     println!("Connected to: {}", port.name());
    ///     Ok(())
    /// }
    /// ```
    fn open(&self, name: &str, baud_rate: u32) -> Result<Port> {
        let stream = Self::open_port(name, baud_rate)?;
        let (reader, writer) = tokio::io::split(stream);
        info!("Successfully opened ELRS device at {}", name);

        Ok(Port::new(
            name,
            baud_rate,
            Box::new(reader),
            Box::new(AsyncWritePort::new(writer)),
        ))
    }
}
