//! Client operations: admission rules and completion sinks.

use crate::commands::{Command, CommandHandler};
use crate::deferred::Deferred;
use crate::error::Error;
use crate::session::SessionState;
use crate::types::{Barcode, DeviceState};

/// Client-facing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    OpenSession,
    CloseSession,
    RequestBarcodes,
    CancelBarcodes,
    CreatePayment,
    CreatePaymentToken,
    ConfirmPayment,
    CancelPayment,
    Get,
    Set,
    SetInterface,
    BeginPrivate,
    Commit,
    GetState,
}

impl OperationKind {
    /// Name used in [`Error::InvalidState`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenSession => "openSession",
            Self::CloseSession => "closeSession",
            Self::RequestBarcodes => "requestBarcodes",
            Self::CancelBarcodes => "cancelBarcodes",
            Self::CreatePayment => "createPayment",
            Self::CreatePaymentToken => "createPaymentToken",
            Self::ConfirmPayment => "confirmPayment",
            Self::CancelPayment => "cancelPayment",
            Self::Get => "get",
            Self::Set => "set",
            Self::SetInterface => "setInterface",
            Self::BeginPrivate => "beginPrivate",
            Self::Commit => "commit",
            Self::GetState => "getState",
        }
    }

    /// Whether a failed acknowledgement leaves the session state stale.
    #[must_use]
    pub const fn changes_state(self) -> bool {
        matches!(
            self,
            Self::OpenSession
                | Self::CloseSession
                | Self::RequestBarcodes
                | Self::CancelBarcodes
                | Self::CreatePayment
                | Self::CreatePaymentToken
                | Self::ConfirmPayment
                | Self::CancelPayment
        )
    }

    /// Returns the state the session moves to when this operation is
    /// admitted in `state`, or `None` if it is not allowed there.
    #[must_use]
    pub const fn admit(self, state: SessionState, unconfirmed_payment: bool) -> Option<SessionState> {
        use SessionState as S;

        match (self, state) {
            (Self::OpenSession, S::SessionClosed) => Some(S::SessionOpened),
            (Self::CloseSession, S::SessionOpened) => Some(S::SessionClosed),
            (Self::RequestBarcodes, S::SessionOpened) => Some(S::AwaitingBarcodes),
            (Self::CancelBarcodes, S::AwaitingBarcodes)
            | (Self::CancelPayment, S::AwaitingPaymentResult | S::AwaitingPaymentToken) => {
                Some(S::SessionOpened)
            }
            (Self::CreatePayment, S::SessionOpened) => Some(S::AwaitingPaymentResult),
            (Self::CreatePaymentToken, S::SessionOpened) => Some(S::AwaitingPaymentToken),
            (Self::ConfirmPayment, S::SessionOpened) if unconfirmed_payment => {
                Some(S::AwaitingConfirmation)
            }
            (Self::CancelPayment, S::SessionOpened) if unconfirmed_payment => {
                Some(S::SessionOpened)
            }
            (Self::SetInterface, S::SessionClosed) => Some(S::SessionClosed),
            (
                Self::Get | Self::Set | Self::BeginPrivate | Self::Commit | Self::GetState,
                S::NoDevice | S::Resynchronizing,
            ) => None,
            (Self::Get | Self::Set | Self::BeginPrivate | Self::Commit | Self::GetState, other) => {
                Some(other)
            }
            _ => None,
        }
    }
}

/// Operation settled by an event rather than by its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitKind {
    Barcodes,
    Payment,
    Token,
}

/// Where the outcome of a queued operation goes.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Resolved by an empty acknowledgement.
    Unit(Deferred<()>),
    /// Resolved by the single value of the acknowledgement.
    Value(Deferred<String>),
    /// Resolved by the five `GETSTATE` flags.
    State(Deferred<DeviceState>),
    /// The acknowledgement only starts the operation; an event settles it.
    Await(AwaitKind),
    /// `CANCEL_BARCODES`: `done` settles with the acknowledgement, and the
    /// barcode request it cancels resolves with an empty list.
    CancelBarcodes {
        done: Deferred<()>,
        barcodes: Option<Deferred<Vec<Barcode>>>,
    },
}

/// Acknowledgement decoded for a [`Completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AckValue {
    Unit,
    Value(String),
    State(DeviceState),
}

impl Completion {
    /// Sends `command` through the handler method matching the
    /// acknowledgement this completion expects.
    pub(crate) fn submit(&self, handler: &CommandHandler, command: &Command) -> Deferred<AckValue> {
        match self {
            Self::Unit(_) | Self::Await(_) | Self::CancelBarcodes { .. } => {
                handler.execute_unit(command).then(|_| Ok(AckValue::Unit))
            }
            Self::Value(_) => handler
                .execute_value(command)
                .then(|value| Ok(AckValue::Value(value.clone()))),
            Self::State(_) => handler
                .execute_state(command)
                .then(|state| Ok(AckValue::State(*state))),
        }
    }

    /// Resolves the sink. Await completions are settled elsewhere.
    pub(crate) fn resolve(&self, value: AckValue) {
        match (self, value) {
            (Self::Unit(sink), _) if sink.is_pending() => sink.resolve(()),
            (Self::Value(sink), AckValue::Value(value)) if sink.is_pending() => sink.resolve(value),
            (Self::State(sink), AckValue::State(state)) if sink.is_pending() => sink.resolve(state),
            (Self::CancelBarcodes { done, barcodes }, _) => {
                if let Some(barcodes) = barcodes.as_ref().filter(|b| b.is_pending()) {
                    barcodes.resolve(Vec::new());
                }
                if done.is_pending() {
                    done.resolve(());
                }
            }
            _ => {}
        }
    }

    /// Rejects the sink if still pending. Await completions are settled
    /// elsewhere.
    pub(crate) fn reject(&self, error: Error) {
        match self {
            Self::Unit(sink) if sink.is_pending() => sink.reject(error),
            Self::Value(sink) if sink.is_pending() => sink.reject(error),
            Self::State(sink) if sink.is_pending() => sink.reject(error),
            Self::CancelBarcodes { done, barcodes } => {
                if let Some(barcodes) = barcodes.as_ref().filter(|b| b.is_pending()) {
                    barcodes.reject(error.clone());
                }
                if done.is_pending() {
                    done.reject(error);
                }
            }
            _ => {}
        }
    }
}

/// A queued client request.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub command: Command,
    pub completion: Completion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::engine::tests::RecordingTransport;
    use crate::protocol::{DeviceParameter, ProtocolEngine};
    use crate::types::PaymentRequest;

    #[test]
    fn test_admission_table() {
        use SessionState as S;

        assert_eq!(
            OperationKind::OpenSession.admit(S::SessionClosed, false),
            Some(S::SessionOpened)
        );
        assert_eq!(OperationKind::OpenSession.admit(S::SessionOpened, false), None);
        assert_eq!(
            OperationKind::RequestBarcodes.admit(S::AwaitingPaymentResult, false),
            None
        );
        assert_eq!(
            OperationKind::CreatePayment.admit(S::AwaitingBarcodes, false),
            None
        );
        assert_eq!(OperationKind::ConfirmPayment.admit(S::SessionOpened, false), None);
        assert_eq!(
            OperationKind::ConfirmPayment.admit(S::SessionOpened, true),
            Some(S::AwaitingConfirmation)
        );
        assert_eq!(
            OperationKind::CancelPayment.admit(S::AwaitingPaymentToken, false),
            Some(S::SessionOpened)
        );
        assert_eq!(OperationKind::SetInterface.admit(S::SessionOpened, false), None);
        assert_eq!(OperationKind::Get.admit(S::Resynchronizing, false), None);
        assert_eq!(
            OperationKind::Get.admit(S::AwaitingBarcodes, false),
            Some(S::AwaitingBarcodes)
        );
    }

    #[test]
    fn test_completion_submit() {
        let transport = RecordingTransport::default();
        let handler = CommandHandler::new(ProtocolEngine::new(Box::new(transport.clone())));
        let engine = handler.engine().clone();
        let get = Command::get(DeviceParameter::Version);

        let value = Completion::Value(Deferred::new()).submit(&handler, &get);
        engine.handle_line(b"GET ok 1.0.5");
        assert_eq!(value.value(), Some(AckValue::Value("1.0.5".to_string())));

        let missing = Completion::Value(Deferred::new()).submit(&handler, &get);
        engine.handle_line(b"GET ok");
        assert!(matches!(missing.error(), Some(Error::Protocol { .. })));

        let started = Completion::Await(AwaitKind::Payment)
            .submit(&handler, &Command::create_payment(&PaymentRequest::new(100, "t1")));
        engine.handle_line(b"CREATE_PAYMENT ok extra");
        assert!(matches!(started.error(), Some(Error::Protocol { .. })));

        let state = Completion::State(Deferred::new()).submit(&handler, &Command::get_state());
        engine.handle_line(b"GETSTATE ok 1 0 0 0 0");
        assert!(matches!(state.value(), Some(AckValue::State(s)) if s.session_opened));
        assert_eq!(
            transport.written.borrow().as_slice(),
            ["GET version", "GET version", "CREATE_PAYMENT 100 t1", "GETSTATE"]
        );
    }

    #[test]
    fn test_cancel_completion_settles_once() {
        let done = Deferred::new();
        let barcodes = Deferred::new();
        let completion = Completion::CancelBarcodes {
            done: done.clone(),
            barcodes: Some(barcodes.clone()),
        };
        completion.resolve(AckValue::Unit);
        completion.reject(Error::Cancelled);
        assert_eq!(barcodes.value(), Some(Vec::new()));
        assert_eq!(done.value(), Some(()));
    }
}
