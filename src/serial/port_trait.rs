//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Trait for the write side of a serial port
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Flush and release the port. No writes are expected afterwards.
    async fn close(&mut self) -> io::Result<()> {
        self.flush().await
    }
}

/// Adapter giving any async writer (e.g. the write half of a
/// `tokio_serial::SerialStream`) the [`SerialPortIO`] interface
pub struct AsyncWritePort<W> {
    port: W,
}

impl<W> AsyncWritePort<W> {
    pub fn new(port: W) -> Self {
        Self { port }
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> SerialPortIO for AsyncWritePort<W> {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.port.shutdown().await
    }
}
