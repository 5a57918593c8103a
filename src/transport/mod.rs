//! Transport layer for jetbeep communication.
//!
//! A transport is an opened byte stream to one device. Writes are
//! synchronous hand-offs; everything read from the device (plus read/write
//! failures) comes back as [`Inbound`] messages on a channel, tagged with
//! the generation of the attachment that produced them so stale messages
//! from an earlier attachment can be told apart.

pub mod serial;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Payload of an [`Inbound`] message.
#[derive(Debug, Clone)]
pub enum InboundKind {
    /// One decoded line, terminator stripped.
    Line(Bytes),
    /// Read or write failure, or a line the decoder rejected.
    Error(Error),
    /// The device closed the stream.
    Closed,
}

/// A message from a transport to the session that owns it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub generation: u64,
    pub kind: InboundKind,
}

/// Sending side of the inbound channel, bound to one generation.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<Inbound>,
    generation: u64,
}

impl InboundSender {
    /// Creates a sender tagging messages with `generation`.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<Inbound>, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// Generation this sender tags messages with.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Forwards a line. Returns false once the receiver is gone.
    pub fn line(&self, line: Bytes) -> bool {
        self.send(InboundKind::Line(line))
    }

    /// Forwards a failure. Returns false once the receiver is gone.
    pub fn error(&self, error: Error) -> bool {
        self.send(InboundKind::Error(error))
    }

    /// Reports end of stream. Returns false once the receiver is gone.
    pub fn closed(&self) -> bool {
        self.send(InboundKind::Closed)
    }

    fn send(&self, kind: InboundKind) -> bool {
        self.tx
            .send(Inbound {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// An opened byte stream to a device.
///
/// Implementations must not block: `write` queues the bytes and any later
/// failure is reported through the [`InboundSender`] given at open time.
pub trait Transport {
    /// Queues bytes for the device.
    fn write(&mut self, data: Bytes) -> Result<()>;

    /// Closes the stream. Further writes fail with [`Error::NotConnected`].
    fn close(&mut self);
}

/// Opens transports for OS paths.
pub trait TransportProvider {
    /// Opens the device at `path`, delivering its input to `inbound`.
    fn open(&self, path: &str, inbound: InboundSender) -> Result<Box<dyn Transport>>;
}

pub use serial::{SerialConfig, SerialProvider, SerialTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_sender_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = InboundSender::new(tx, 7);
        assert!(sender.line(Bytes::from_static(b"MOBILE_CONNECTED")));
        assert!(sender.closed());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.generation, 7);
        assert!(matches!(first.kind, InboundKind::Line(ref l) if &l[..] == b"MOBILE_CONNECTED"));
        assert!(matches!(rx.try_recv().unwrap().kind, InboundKind::Closed));

        drop(rx);
        assert!(!sender.error(Error::DeviceLost));
    }
}
