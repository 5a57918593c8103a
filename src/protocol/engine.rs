//! Command/acknowledgement correlation over one transport.
//!
//! The engine holds at most one command in flight. An inbound line whose
//! verb equals the in-flight verb is its acknowledgement; any other line
//! must be an event. Queueing is the caller's job.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::command::Verb;
use crate::protocol::{line, parser};
use crate::transport::Transport;

/// Successful acknowledgement: the tokens after `ok`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub verb: Verb,
    pub values: Vec<String>,
}

impl Ack {
    /// Fails unless the acknowledgement carries no values.
    ///
    /// # Errors
    ///
    /// Returns a protocol error listing the unexpected values.
    pub fn expect_empty(&self) -> Result<()> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "{} ack carries unexpected values: {:?}",
                self.verb, self.values
            )))
        }
    }

    /// Returns the single value of the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless exactly one value is present.
    pub fn single_value(&self) -> Result<&str> {
        match self.values.as_slice() {
            [value] => Ok(value),
            values => Err(Error::protocol(format!(
                "{} ack expects one value, got {}",
                self.verb,
                values.len()
            ))),
        }
    }
}

type EventHandler = Rc<dyn Fn(&Event)>;
type ErrorHandler = Rc<dyn Fn(&Error)>;

struct InFlight {
    verb: Verb,
    ack: Deferred<Ack>,
}

#[derive(Default)]
struct Inner {
    transport: RefCell<Option<Box<dyn Transport>>>,
    in_flight: RefCell<Option<InFlight>>,
    on_event: RefCell<Option<EventHandler>>,
    on_error: RefCell<Option<ErrorHandler>>,
}

/// Protocol engine bound to one opened transport.
///
/// Cloning yields another handle to the same engine. Every method releases
/// its internal borrows before settling a [`Deferred`] or invoking a
/// handler, so continuations may call back into the engine.
#[derive(Clone, Default)]
pub struct ProtocolEngine {
    inner: Rc<Inner>,
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("open", &self.is_open())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ProtocolEngine {
    /// Creates an engine writing to `transport`.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let engine = Self::default();
        *engine.inner.transport.borrow_mut() = Some(transport);
        engine
    }

    /// Sets the handler for unsolicited events.
    pub fn set_event_handler(&self, handler: impl Fn(&Event) + 'static) {
        *self.inner.on_event.borrow_mut() = Some(Rc::new(handler));
    }

    /// Sets the handler for lines that are neither an ack nor a valid event,
    /// and for transport failures with no command in flight.
    pub fn set_error_handler(&self, handler: impl Fn(&Error) + 'static) {
        *self.inner.on_error.borrow_mut() = Some(Rc::new(handler));
    }

    /// Returns true while the transport is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.transport.borrow().is_some()
    }

    /// Verb of the command awaiting its acknowledgement.
    #[must_use]
    pub fn in_flight(&self) -> Option<Verb> {
        self.inner.in_flight.borrow().as_ref().map(|f| f.verb)
    }

    /// Writes `<verb> <args>\r\n` and returns the acknowledgement.
    ///
    /// Rejects with [`Error::OperationInProgress`] if a command is already
    /// in flight, [`Error::NotConnected`] after [`close`](Self::close), or
    /// the transport's write error.
    pub fn submit(&self, verb: Verb, args: &str) -> Deferred<Ack> {
        if let Some(busy) = self.in_flight() {
            tracing::warn!("{} submitted while {} is in flight", verb, busy);
            return Deferred::rejected(Error::OperationInProgress);
        }

        let data = line::encode(verb.as_str(), args);
        tracing::debug!("tx: {} {}", verb, args);
        let written = match self.inner.transport.borrow_mut().as_mut() {
            Some(transport) => transport.write(data),
            None => Err(Error::NotConnected),
        };
        if let Err(e) = written {
            tracing::warn!("failed to write {}: {}", verb, e);
            return Deferred::rejected(e);
        }

        let ack = Deferred::new();
        *self.inner.in_flight.borrow_mut() = Some(InFlight {
            verb,
            ack: ack.clone(),
        });
        ack
    }

    /// Handles one decoded line from the device.
    pub fn handle_line(&self, data: &[u8]) {
        let tokens = match parser::tokenize(data) {
            Ok(tokens) => tokens,
            Err(e) => return self.report(&e),
        };
        let Some((&first, params)) = tokens.split_first() else {
            return;
        };
        tracing::debug!("rx: {}", tokens.join(" "));

        let verb = Verb::from_token(first);
        if verb.is_some() && verb == self.in_flight() {
            let Some(pending) = self.inner.in_flight.borrow_mut().take() else {
                return;
            };
            match params.split_first() {
                Some((&"ok", values)) => pending.ack.resolve(Ack {
                    verb: pending.verb,
                    values: values.iter().map(ToString::to_string).collect(),
                }),
                Some((&code, _)) => pending.ack.reject(Error::InvalidResponse {
                    reason: code.to_string(),
                }),
                None => pending.ack.reject(Error::protocol(format!(
                    "{} acknowledgement without status",
                    pending.verb
                ))),
            }
            return;
        }

        match verb {
            Some(verb) if verb.is_event() => match parser::parse_event(verb, params) {
                Ok(event) => self.dispatch(&event),
                Err(e) => self.report(&e),
            },
            _ => self.report(&Error::protocol(format!(
                "unexpected line: {}",
                tokens.join(" ")
            ))),
        }
    }

    /// Handles a transport failure: the in-flight command is rejected with
    /// `error`, or the error handler sees it when nothing is in flight.
    pub fn handle_transport_error(&self, error: Error) {
        if !self.fail_in_flight(error.clone()) {
            self.report(&error);
        }
    }

    /// Rejects the in-flight command, if any. Returns whether one was.
    pub fn fail_in_flight(&self, error: Error) -> bool {
        let pending = self.inner.in_flight.borrow_mut().take();
        match pending {
            Some(pending) => {
                tracing::debug!("{} failed: {}", pending.verb, error);
                pending.ack.reject(error);
                true
            }
            None => false,
        }
    }

    /// Closes the transport and rejects the in-flight command with `error`.
    pub fn close(&self, error: Error) {
        let transport = self.inner.transport.borrow_mut().take();
        if let Some(mut transport) = transport {
            transport.close();
        }
        self.fail_in_flight(error);
    }

    fn dispatch(&self, event: &Event) {
        let handler = self.inner.on_event.borrow().clone();
        match handler {
            Some(handler) => handler(event),
            None => tracing::warn!("dropping event without handler: {:?}", event),
        }
    }

    fn report(&self, error: &Error) {
        let handler = self.inner.on_error.borrow().clone();
        match handler {
            Some(handler) => handler(error),
            None => tracing::warn!("unhandled protocol error: {}", error),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;

    use bytes::Bytes;

    use super::*;
    use crate::types::{Barcode, BarcodeType};

    /// Transport recording written lines.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) written: Rc<RefCell<Vec<String>>>,
        pub(crate) closed: Rc<Cell<bool>>,
        pub(crate) fail_writes: Rc<Cell<bool>>,
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, data: Bytes) -> Result<()> {
            if self.closed.get() {
                return Err(Error::NotConnected);
            }
            if self.fail_writes.get() {
                return Err(std::io::Error::other("write failed").into());
            }
            let text = String::from_utf8_lossy(&data);
            self.written
                .borrow_mut()
                .push(text.trim_end_matches("\r\n").to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.closed.set(true);
        }
    }

    fn engine() -> (ProtocolEngine, RecordingTransport) {
        let transport = RecordingTransport::default();
        (ProtocolEngine::new(Box::new(transport.clone())), transport)
    }

    #[test]
    fn test_ack_resolves_in_flight() {
        let (engine, transport) = engine();
        let ack = engine.submit(Verb::Get, "version");
        assert_eq!(*transport.written.borrow(), vec!["GET version"]);
        assert_eq!(engine.in_flight(), Some(Verb::Get));

        engine.handle_line(b"GET ok 1.0.4-beta");
        assert_eq!(engine.in_flight(), None);
        let ack = ack.value().unwrap();
        assert_eq!(ack.single_value().unwrap(), "1.0.4-beta");
    }

    #[test]
    fn test_failure_ack_rejects_with_reason() {
        let (engine, _) = engine();
        let ack = engine.submit(Verb::OpenSession, "");
        engine.handle_line(b"OPEN_SESSION err_busy");
        assert!(matches!(
            ack.error(),
            Some(Error::InvalidResponse { reason }) if reason == "err_busy"
        ));
        assert_eq!(engine.in_flight(), None);
    }

    #[test]
    fn test_missing_status_is_protocol_error() {
        let (engine, _) = engine();
        let ack = engine.submit(Verb::ResetState, "");
        engine.handle_line(b"RESET_STATE");
        assert!(matches!(ack.error(), Some(Error::Protocol { .. })));
    }

    #[test]
    fn test_second_submit_is_rejected() {
        let (engine, transport) = engine();
        let first = engine.submit(Verb::OpenSession, "");
        let second = engine.submit(Verb::CloseSession, "");
        assert!(matches!(second.error(), Some(Error::OperationInProgress)));
        assert!(first.is_pending());
        assert_eq!(transport.written.borrow().len(), 1);
    }

    #[test]
    fn test_events_interleave_with_ack() {
        let (engine, _) = engine();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.set_event_handler(move |event| sink.borrow_mut().push(format!("{event:?}")));

        let ack = engine.submit(Verb::RequestBarcodes, "");
        engine.handle_line(b"MOBILE_CONNECTED");
        assert!(ack.is_pending());
        engine.handle_line(b"REQUEST_BARCODES ok");
        assert!(ack.value().is_some());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_barcode_event() {
        let (engine, _) = engine();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.set_event_handler(move |event| {
            if let Event::Barcodes(barcodes) = event {
                sink.borrow_mut().extend(barcodes.iter().cloned());
            }
        });

        engine.handle_line(b"BARCODES 123456 4 789012 1");
        assert_eq!(
            *seen.borrow(),
            vec![
                Barcode {
                    value: "123456".into(),
                    kind: BarcodeType::from_code(4),
                },
                Barcode {
                    value: "789012".into(),
                    kind: BarcodeType::from_code(1),
                },
            ]
        );
    }

    #[test]
    fn test_unknown_and_malformed_lines_reach_error_handler() {
        let (engine, _) = engine();
        let errors = Rc::new(Cell::new(0));
        let count = errors.clone();
        engine.set_error_handler(move |e| {
            assert!(matches!(e, Error::Protocol { .. }));
            count.set(count.get() + 1);
        });

        engine.handle_line(b"HELLO world");
        engine.handle_line(b"BARCODES 123456");
        // an ack with nothing in flight is unexpected
        engine.handle_line(b"OPEN_SESSION ok");
        assert_eq!(errors.get(), 3);
    }

    #[test]
    fn test_write_failure_rejects_immediately() {
        let (engine, transport) = engine();
        transport.fail_writes.set(true);
        let ack = engine.submit(Verb::GetState, "");
        assert!(matches!(ack.error(), Some(Error::Io(_))));
        assert_eq!(engine.in_flight(), None);
    }

    #[test]
    fn test_transport_error_fails_in_flight() {
        let (engine, _) = engine();
        let ack = engine.submit(Verb::Get, "deviceId");
        engine.handle_transport_error(std::io::Error::other("unplugged").into());
        assert!(matches!(ack.error(), Some(Error::Io(_))));
        assert_eq!(engine.in_flight(), None);
    }

    #[test]
    fn test_close() {
        let (engine, transport) = engine();
        let ack = engine.submit(Verb::OpenSession, "");
        engine.close(Error::DeviceLost);
        assert!(transport.closed.get());
        assert!(!engine.is_open());
        assert!(matches!(ack.error(), Some(Error::DeviceLost)));
        assert!(matches!(
            engine.submit(Verb::OpenSession, "").error(),
            Some(Error::NotConnected)
        ));
    }

    #[test]
    fn test_resubmit_from_ack_continuation() {
        let (engine, transport) = engine();
        let next = Rc::new(RefCell::new(None));
        let slot = next.clone();
        let handle = engine.clone();
        engine.submit(Verb::ResetState, "").then_do(move |_| {
            *slot.borrow_mut() = Some(handle.submit(Verb::OpenSession, ""));
        });

        engine.handle_line(b"RESET_STATE ok");
        assert!(next.borrow().is_some());
        assert_eq!(engine.in_flight(), Some(Verb::OpenSession));
        assert_eq!(transport.written.borrow().len(), 2);
    }
}
