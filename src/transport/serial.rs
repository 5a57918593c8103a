//! Serial/USB transport implementation.
//!
//! The port is split into halves: a reader task decodes lines and forwards
//! them on the inbound channel, a writer task drains an outgoing queue.
//! Both run on the tokio runtime; only channels cross into the session.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::error::{Error, Result};
use crate::protocol::LineDecoder;
use crate::transport::{InboundSender, Transport, TransportProvider};
use crate::types::DeviceIdentity;

/// Default baud rate for jetbeep devices.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Configuration for serial transports.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate.
    pub baud_rate: u32,
    /// Size of the buffer each read fills.
    pub read_buffer: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the read buffer size.
    #[must_use]
    pub const fn read_buffer(mut self, size: usize) -> Self {
        self.read_buffer = size;
        self
    }
}

/// Opens [`SerialTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct SerialProvider {
    config: SerialConfig,
}

impl SerialProvider {
    /// Creates a provider with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl TransportProvider for SerialProvider {
    fn open(&self, path: &str, inbound: InboundSender) -> Result<Box<dyn Transport>> {
        tracing::info!("opening serial port: {}", path);
        let stream = tokio_serial::new(path, self.config.baud_rate).open_native_async()?;
        Ok(Box::new(SerialTransport::spawn(
            stream,
            inbound,
            self.config.read_buffer,
        )))
    }
}

/// Serial transport backed by reader and writer tasks.
pub struct SerialTransport {
    outgoing: Option<mpsc::UnboundedSender<Bytes>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SerialTransport {
    /// Splits `stream` and spawns its I/O tasks on the current runtime.
    #[must_use]
    pub fn spawn(stream: SerialStream, inbound: InboundSender, read_buffer: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outgoing, queue) = mpsc::unbounded_channel();

        let reader = tokio::spawn(run_read_loop(read_half, inbound.clone(), read_buffer));
        let writer = tokio::spawn(run_write_loop(write_half, queue, inbound));

        Self {
            outgoing: Some(outgoing),
            reader,
            writer,
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: Bytes) -> Result<()> {
        let outgoing = self.outgoing.as_ref().ok_or(Error::NotConnected)?;
        tracing::trace!("queueing {} bytes", data.len());
        outgoing.send(data).map_err(|_| Error::NotConnected)
    }

    fn close(&mut self) {
        if self.outgoing.take().is_some() {
            tracing::info!("closing serial port");
        }
        self.reader.abort();
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn run_read_loop(
    mut reader: ReadHalf<SerialStream>,
    inbound: InboundSender,
    read_buffer: usize,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; read_buffer.max(1)];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("serial port closed");
                inbound.closed();
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("serial read error: {}", e);
                inbound.error(e.into());
                return;
            }
        };

        tracing::trace!("received {} bytes", n);
        decoder.feed(&buf[..n]);

        loop {
            match decoder.decode() {
                Ok(Some(line)) => {
                    if !inbound.line(line) {
                        tracing::debug!("inbound receiver dropped");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("line decode error: {}", e);
                    if !inbound.error(e) {
                        return;
                    }
                }
            }
        }
    }
}

async fn run_write_loop(
    mut writer: WriteHalf<SerialStream>,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    inbound: InboundSender,
) {
    while let Some(data) = queue.recv().await {
        let result = async {
            writer.write_all(&data).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::error!("serial write error: {}", e);
            inbound.error(e.into());
            return;
        }
        tracing::trace!("sent {} bytes", data.len());
    }
    if let Err(e) = writer.shutdown().await {
        if e.kind() != io::ErrorKind::NotConnected {
            tracing::debug!("serial shutdown error: {}", e);
        }
    }
}

/// Lists USB serial ports with their vendor and product ids.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<DeviceIdentity>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => {
                Some(DeviceIdentity::new(usb.vid, usb.pid, port.port_name))
            }
            _ => None,
        })
        .collect())
}
