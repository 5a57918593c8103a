//! Command handlers for jetbeep operations.
//!
//! [`Command`] is a serialized command line waiting to be sent.
//! [`CommandHandler`] sends commands through a [`ProtocolEngine`] and
//! converts their acknowledgements into typed results.

use std::fmt;

use crate::deferred::Deferred;
use crate::protocol::{
    Ack, BeginPrivateMode, DeviceParameter, Interface, ProtocolEngine, Verb, encode_payment_args,
    parse_device_state,
};
use crate::types::{DeviceState, PaymentRequest};

/// A command verb with its encoded argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub args: String,
}

impl Command {
    /// Creates a command without arguments.
    #[must_use]
    pub const fn bare(verb: Verb) -> Self {
        Self {
            verb,
            args: String::new(),
        }
    }

    /// Creates a command with an encoded argument list.
    #[must_use]
    pub fn with_args(verb: Verb, args: impl Into<String>) -> Self {
        Self {
            verb,
            args: args.into(),
        }
    }

    #[must_use]
    pub const fn open_session() -> Self {
        Self::bare(Verb::OpenSession)
    }

    #[must_use]
    pub const fn close_session() -> Self {
        Self::bare(Verb::CloseSession)
    }

    #[must_use]
    pub const fn request_barcodes() -> Self {
        Self::bare(Verb::RequestBarcodes)
    }

    #[must_use]
    pub const fn cancel_barcodes() -> Self {
        Self::bare(Verb::CancelBarcodes)
    }

    #[must_use]
    pub fn create_payment(request: &PaymentRequest) -> Self {
        Self::with_args(Verb::CreatePayment, encode_payment_args(request))
    }

    #[must_use]
    pub fn create_payment_token(request: &PaymentRequest) -> Self {
        Self::with_args(Verb::CreatePaymentToken, encode_payment_args(request))
    }

    #[must_use]
    pub const fn confirm_payment() -> Self {
        Self::bare(Verb::ConfirmPayment)
    }

    #[must_use]
    pub const fn cancel_payment() -> Self {
        Self::bare(Verb::CancelPayment)
    }

    #[must_use]
    pub const fn reset_state() -> Self {
        Self::bare(Verb::ResetState)
    }

    #[must_use]
    pub fn get(parameter: DeviceParameter) -> Self {
        Self::with_args(Verb::Get, parameter.as_str())
    }

    #[must_use]
    pub fn set(parameter: DeviceParameter, value: &str) -> Self {
        Self::with_args(Verb::Set, format!("{parameter} {value}"))
    }

    /// `SET bluetooth|nfc enabled|disabled`.
    #[must_use]
    pub fn set_interface(interface: Interface, enabled: bool) -> Self {
        Self::set(interface.parameter(), Interface::value(enabled))
    }

    #[must_use]
    pub fn begin_private(mode: BeginPrivateMode) -> Self {
        Self::with_args(Verb::BeginPrivate, mode.as_str())
    }

    #[must_use]
    pub fn commit(signature: &str) -> Self {
        Self::with_args(Verb::Commit, signature)
    }

    #[must_use]
    pub const fn get_state() -> Self {
        Self::bare(Verb::GetState)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.verb)
        } else {
            write!(f, "{} {}", self.verb, self.args)
        }
    }
}

/// Sends commands and converts their acknowledgements.
///
/// Every method returns immediately; a second call before the previous
/// acknowledgement arrives is rejected by the engine with
/// [`Error::OperationInProgress`](crate::Error::OperationInProgress).
#[derive(Debug, Clone)]
pub struct CommandHandler {
    engine: ProtocolEngine,
}

impl CommandHandler {
    /// Creates a handler sending through `engine`.
    #[must_use]
    pub const fn new(engine: ProtocolEngine) -> Self {
        Self { engine }
    }

    /// The underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Sends a command and returns its raw acknowledgement.
    pub fn execute(&self, command: &Command) -> Deferred<Ack> {
        self.engine.submit(command.verb, &command.args)
    }

    /// Sends a command whose acknowledgement carries no values.
    pub fn execute_unit(&self, command: &Command) -> Deferred<()> {
        self.execute(command).then(Ack::expect_empty)
    }

    /// Sends a command whose acknowledgement carries exactly one value.
    pub fn execute_value(&self, command: &Command) -> Deferred<String> {
        self.execute(command)
            .then(|ack| ack.single_value().map(str::to_string))
    }

    /// Sends a command acknowledged with the five `GETSTATE` flags.
    pub fn execute_state(&self, command: &Command) -> Deferred<DeviceState> {
        self.execute(command)
            .then(|ack| parse_device_state(&ack.values))
    }

    pub fn open_session(&self) -> Deferred<()> {
        self.execute_unit(&Command::open_session())
    }

    pub fn close_session(&self) -> Deferred<()> {
        self.execute_unit(&Command::close_session())
    }

    /// Starts barcode capture. The barcodes arrive later as an event.
    pub fn request_barcodes(&self) -> Deferred<()> {
        self.execute_unit(&Command::request_barcodes())
    }

    pub fn cancel_barcodes(&self) -> Deferred<()> {
        self.execute_unit(&Command::cancel_barcodes())
    }

    /// Starts a payment. The result arrives later as an event.
    pub fn create_payment(&self, request: &PaymentRequest) -> Deferred<()> {
        self.execute_unit(&Command::create_payment(request))
    }

    /// Requests a payment token. The token arrives later as an event.
    pub fn create_payment_token(&self, request: &PaymentRequest) -> Deferred<()> {
        self.execute_unit(&Command::create_payment_token(request))
    }

    pub fn confirm_payment(&self) -> Deferred<()> {
        self.execute_unit(&Command::confirm_payment())
    }

    pub fn cancel_payment(&self) -> Deferred<()> {
        self.execute_unit(&Command::cancel_payment())
    }

    pub fn reset_state(&self) -> Deferred<()> {
        self.execute_unit(&Command::reset_state())
    }

    /// Reads a device parameter.
    pub fn get(&self, parameter: DeviceParameter) -> Deferred<String> {
        self.execute_value(&Command::get(parameter))
    }

    /// Writes a device parameter.
    pub fn set(&self, parameter: DeviceParameter, value: &str) -> Deferred<()> {
        self.execute_unit(&Command::set(parameter, value))
    }

    pub fn begin_private(&self, mode: BeginPrivateMode) -> Deferred<()> {
        self.execute_unit(&Command::begin_private(mode))
    }

    pub fn commit(&self, signature: &str) -> Deferred<()> {
        self.execute_unit(&Command::commit(signature))
    }

    /// Queries the device's own view of the session flags.
    pub fn get_state(&self) -> Deferred<DeviceState> {
        self.execute_state(&Command::get_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::engine::tests::RecordingTransport;

    fn handler() -> (CommandHandler, RecordingTransport) {
        let transport = RecordingTransport::default();
        let engine = ProtocolEngine::new(Box::new(transport.clone()));
        (CommandHandler::new(engine), transport)
    }

    #[test]
    fn test_command_lines() {
        assert_eq!(Command::open_session().to_string(), "OPEN_SESSION");
        assert_eq!(Command::get(DeviceParameter::DeviceId).to_string(), "GET deviceId");
        assert_eq!(
            Command::set_interface(Interface::Bluetooth, false).to_string(),
            "SET bluetooth disabled"
        );
        assert_eq!(
            Command::begin_private(BeginPrivateMode::Setup).to_string(),
            "BEGIN_PRIVATE setup"
        );
        assert_eq!(Command::commit("c0ffee").to_string(), "COMMIT c0ffee");
        assert_eq!(
            Command::create_payment(&PaymentRequest::new(100, "t1").cashier("c")).to_string(),
            "CREATE_PAYMENT 100 t1 c"
        );
    }

    #[test]
    fn test_get_returns_value() {
        let (handler, transport) = handler();
        let version = handler.get(DeviceParameter::Version);
        assert_eq!(*transport.written.borrow(), vec!["GET version"]);

        handler.engine().handle_line(b"GET ok 1.0.5");
        assert_eq!(version.value().as_deref(), Some("1.0.5"));
    }

    #[test]
    fn test_get_without_value_is_protocol_error() {
        let (handler, _) = handler();
        let version = handler.get(DeviceParameter::Version);
        handler.engine().handle_line(b"GET ok");
        assert!(matches!(version.error(), Some(Error::Protocol { .. })));
    }

    #[test]
    fn test_unit_command_rejects_extra_values() {
        let (handler, _) = handler();
        let opened = handler.open_session();
        handler.engine().handle_line(b"OPEN_SESSION ok surprise");
        assert!(matches!(opened.error(), Some(Error::Protocol { .. })));
    }

    #[test]
    fn test_open_session_rejected_with_reason() {
        let (handler, _) = handler();
        let opened = handler.open_session();
        handler.engine().handle_line(b"OPEN_SESSION err_busy");
        assert!(matches!(
            opened.error(),
            Some(Error::InvalidResponse { reason }) if reason == "err_busy"
        ));
    }

    #[test]
    fn test_get_state() {
        let (handler, _) = handler();
        let state = handler.get_state();
        handler.engine().handle_line(b"GETSTATE ok 1 1 0 0 0");
        let state = state.value().unwrap();
        assert!(state.session_opened);
        assert!(state.barcodes_requested);
        assert!(!state.payment_created);

        let short = handler.get_state();
        handler.engine().handle_line(b"GETSTATE ok 1 1");
        assert!(matches!(short.error(), Some(Error::Protocol { .. })));
    }

    #[test]
    fn test_sequential_exchange_with_then_chain() {
        let (handler, transport) = handler();
        let next = handler.clone();
        let done = handler
            .begin_private(BeginPrivateMode::Config)
            .then_chain(move |_| next.set(DeviceParameter::TxPower, "4"));

        handler.engine().handle_line(b"BEGIN_PRIVATE ok");
        handler.engine().handle_line(b"SET ok");
        assert_eq!(
            *transport.written.borrow(),
            vec!["BEGIN_PRIVATE config", "SET txPower 4"]
        );
        assert_eq!(done.value(), Some(()));
    }
}
