//! Session lifecycle for one tracked device.
//!
//! The [`SessionManager`] binds device presence, the protocol engine and
//! client operations into one state machine:
//!
//! ```text
//! NoDevice --attach--> Resynchronizing --handshake ok--> SessionClosed
//!     ^                      |    ^                         |    ^
//!     +--handshake failed----+    +--failed state change----+    |
//!                                                 openSession    closeSession
//!                                                       v        |
//!   AwaitingBarcodes <--requestBarcodes-- SessionOpened ---------+
//!   AwaitingPaymentResult <--createPayment--+  |  +--confirmPayment--> AwaitingConfirmation
//!   AwaitingPaymentToken <--createPaymentToken-+
//! ```
//!
//! Every admitted operation moves the state at call time and is queued;
//! the queue submits one command at a time. Detaching the tracked device
//! rejects everything outstanding with [`Error::DeviceLost`].
//!
//! The manager is `!Send`: all of it, including every [`Deferred`] it hands
//! out, lives on one thread (see [`Client`](crate::Client)).

mod operation;

pub use operation::{AwaitKind, Completion, OperationKind, PendingOperation};
use operation::AckValue;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::commands::{Command, CommandHandler};
use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, SessionEvent, Subscription};
use crate::protocol::{
    BeginPrivateMode, DeviceParameter, Interface, ProtocolEngine, parse_device_id,
};
use crate::transport::{Inbound, InboundKind, InboundSender, TransportProvider};
use crate::types::{
    Barcode, DeviceIdentity, DeviceInfo, DeviceState, FirmwareVersion, MobileEvent,
    NfcDetection, PaymentRequest,
};

/// Oldest firmware the session accepts.
pub const DEFAULT_MINIMUM_FIRMWARE: &str = "1.0.4-beta";

/// Delay before a failed attachment is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No device tracked.
    #[default]
    NoDevice,
    /// Handshake or reset in progress.
    Resynchronizing,
    SessionClosed,
    SessionOpened,
    AwaitingBarcodes,
    AwaitingPaymentResult,
    /// `CONFIRM_PAYMENT` sent, not yet acknowledged.
    AwaitingConfirmation,
    AwaitingPaymentToken,
}

/// Configuration for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Oldest accepted firmware version.
    pub minimum_firmware: String,
    /// Delay before a failed attachment is retried.
    pub retry_delay: Duration,
    /// Span entered around every state machine entry point.
    pub span: tracing::Span,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            minimum_firmware: DEFAULT_MINIMUM_FIRMWARE.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            span: tracing::info_span!("session"),
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the oldest accepted firmware version.
    #[must_use]
    pub fn minimum_firmware(mut self, version: impl Into<String>) -> Self {
        self.minimum_firmware = version.into();
        self
    }

    /// Sets the retry delay.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the span log records of this session are attached to.
    #[must_use]
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

struct Tracked {
    identity: DeviceIdentity,
    handler: CommandHandler,
    info: Option<DeviceInfo>,
}

#[derive(Default)]
struct Awaits {
    barcodes: Option<Deferred<Vec<Barcode>>>,
    payment: Option<Deferred<()>>,
    token: Option<Deferred<String>>,
}

struct Inner {
    config: SessionConfig,
    provider: Box<dyn TransportProvider>,
    inbound: mpsc::UnboundedSender<Inbound>,
    dispatcher: EventDispatcher,
    state: Cell<SessionState>,
    generation: Cell<u64>,
    device: RefCell<Option<Tracked>>,
    queue: RefCell<VecDeque<PendingOperation>>,
    busy: Cell<bool>,
    awaits: RefCell<Awaits>,
    unconfirmed_payment: Cell<bool>,
    mobile_connected: Cell<bool>,
    nfc_card: RefCell<Option<NfcDetection>>,
    retry: RefCell<Option<DeviceIdentity>>,
}

/// The session state machine.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Rc<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("device", &self.tracked_device())
            .field("queued", &self.inner.queue.borrow().len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a session opening transports through `provider`.
    ///
    /// Everything the transports read arrives on the returned receiver and
    /// must be handed back through [`handle_inbound`](Self::handle_inbound).
    pub fn new(
        provider: impl TransportProvider + 'static,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            config,
            provider: Box::new(provider),
            inbound,
            dispatcher: EventDispatcher::default(),
            state: Cell::new(SessionState::NoDevice),
            generation: Cell::new(0),
            device: RefCell::new(None),
            queue: RefCell::new(VecDeque::new()),
            busy: Cell::new(false),
            awaits: RefCell::new(Awaits::default()),
            unconfirmed_payment: Cell::new(false),
            mobile_connected: Cell::new(false),
            nfc_card: RefCell::new(None),
            retry: RefCell::new(None),
        };
        (
            Self {
                inner: Rc::new(inner),
            },
            inbound_rx,
        )
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// The session's configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Identity of the tracked device.
    #[must_use]
    pub fn tracked_device(&self) -> Option<DeviceIdentity> {
        self.inner
            .device
            .borrow()
            .as_ref()
            .map(|tracked| tracked.identity.clone())
    }

    /// Version and id read during the handshake.
    #[must_use]
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner
            .device
            .borrow()
            .as_ref()
            .and_then(|tracked| tracked.info.clone())
    }

    /// Whether a phone is connected to the device.
    #[must_use]
    pub fn is_mobile_connected(&self) -> bool {
        self.inner.mobile_connected.get()
    }

    /// Whether an NFC card is in the device's field.
    #[must_use]
    pub fn is_nfc_detected(&self) -> bool {
        self.inner.nfc_card.borrow().is_some()
    }

    /// The card currently in the field.
    #[must_use]
    pub fn nfc_card(&self) -> Option<NfcDetection> {
        self.inner.nfc_card.borrow().clone()
    }

    /// Whether a successful payment is waiting for confirmation.
    #[must_use]
    pub fn has_unconfirmed_payment(&self) -> bool {
        self.inner.unconfirmed_payment.get()
    }

    /// Subscribes to state changes and notifications.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        self.inner.dispatcher.subscribe(filter)
    }

    /// The dispatcher session events are broadcast on.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Generation of the current attachment. Inbound messages tagged with
    /// another generation are dropped.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// Takes the identity whose attachment failed and should be retried.
    pub fn take_retry_candidate(&self) -> Option<DeviceIdentity> {
        self.inner.retry.borrow_mut().take()
    }

    fn handler(&self) -> Option<CommandHandler> {
        self.inner
            .device
            .borrow()
            .as_ref()
            .map(|tracked| tracked.handler.clone())
    }

    fn set_state(&self, state: SessionState, error: Option<Error>) {
        let previous = self.inner.state.replace(state);
        if previous == state && error.is_none() {
            return;
        }
        match &error {
            Some(e) => tracing::info!("state {:?} -> {:?}: {}", previous, state, e),
            None => tracing::info!("state {:?} -> {:?}", previous, state),
        }
        self.inner
            .dispatcher
            .dispatch(SessionEvent::StateChanged { state, error });
    }

    // Presence

    /// Starts tracking `identity`, unless a device is already tracked.
    pub fn attach(&self, identity: DeviceIdentity) {
        let _entered = self.inner.config.span.enter();

        if let Some(tracked) = self.tracked_device() {
            tracing::info!("ignoring {}: already tracking {}", identity, tracked);
            return;
        }
        {
            let mut retry = self.inner.retry.borrow_mut();
            if retry.as_ref() == Some(&identity) {
                *retry = None;
            }
        }

        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);
        tracing::info!("attaching {}", identity);

        let sender = InboundSender::new(self.inner.inbound.clone(), generation);
        let transport = match self.inner.provider.open(&identity.path, sender) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!("failed to open {}: {}", identity, e);
                *self.inner.retry.borrow_mut() = Some(identity);
                self.set_state(SessionState::NoDevice, Some(e));
                return;
            }
        };

        let engine = ProtocolEngine::new(transport);
        let weak = Rc::downgrade(&self.inner);
        engine.set_event_handler(move |event| {
            if let Some(session) = Self::from_weak(&weak) {
                session.handle_event(event);
            }
        });
        let weak = Rc::downgrade(&self.inner);
        engine.set_error_handler(move |error| {
            if let Some(session) = Self::from_weak(&weak) {
                tracing::warn!("protocol error: {}", error);
                session
                    .inner
                    .dispatcher
                    .dispatch(SessionEvent::ProtocolError(error.clone()));
            }
        });

        *self.inner.device.borrow_mut() = Some(Tracked {
            identity,
            handler: CommandHandler::new(engine),
            info: None,
        });
        self.inner.unconfirmed_payment.set(false);
        self.inner.mobile_connected.set(false);
        self.inner.nfc_card.take();
        self.set_state(SessionState::Resynchronizing, None);
        self.handshake(generation);
    }

    /// Stops tracking `identity` if it is the tracked device.
    pub fn detach(&self, identity: &DeviceIdentity) {
        let _entered = self.inner.config.span.enter();

        {
            let mut retry = self.inner.retry.borrow_mut();
            if retry.as_ref() == Some(identity) {
                *retry = None;
            }
        }
        if self.tracked_device().as_ref() != Some(identity) {
            tracing::debug!("ignoring detach of untracked {}", identity);
            return;
        }
        tracing::info!("detached {}", identity);
        self.drop_device(Error::DeviceLost);
    }

    /// Handles a message from the tracked device's transport.
    pub fn handle_inbound(&self, inbound: Inbound) {
        let _entered = self.inner.config.span.enter();

        if inbound.generation != self.inner.generation.get() {
            tracing::trace!("dropping inbound from stale generation {}", inbound.generation);
            return;
        }
        let Some(handler) = self.handler() else {
            return;
        };

        match inbound.kind {
            InboundKind::Line(line) => handler.engine().handle_line(&line),
            // the I/O tasks stop after a read or write failure
            InboundKind::Error(e @ (Error::Io(_) | Error::Serial(_))) => {
                tracing::warn!("transport failed: {}", e);
                self.lose_device(e);
            }
            InboundKind::Error(e) => {
                tracing::warn!("transport error: {}", e);
                handler.engine().handle_transport_error(e);
            }
            InboundKind::Closed => {
                tracing::warn!("transport closed by device");
                self.lose_device(Error::DeviceLost);
            }
        }
    }

    /// Drops a device whose transport died and marks it for a retry.
    fn lose_device(&self, error: Error) {
        let identity = self.tracked_device();
        self.drop_device(error);
        *self.inner.retry.borrow_mut() = identity;
    }

    /// Forgets the tracked device and rejects everything outstanding.
    fn drop_device(&self, error: Error) {
        let Some(tracked) = self.inner.device.borrow_mut().take() else {
            return;
        };
        self.inner.generation.set(self.inner.generation.get() + 1);
        self.inner.busy.set(false);
        self.inner.unconfirmed_payment.set(false);
        self.inner.mobile_connected.set(false);
        self.inner.nfc_card.take();
        self.inner.state.set(SessionState::NoDevice);

        tracked.handler.engine().close(error.clone());
        self.reject_queue(&error);
        self.reject_awaits(&error);
        // the state was set silently above so continuations see NoDevice
        self.inner.dispatcher.dispatch(SessionEvent::StateChanged {
            state: SessionState::NoDevice,
            error: Some(error.clone()),
        });
        tracing::info!("state -> NoDevice: {}", error);
    }

    // Handshake and recovery

    fn handshake(&self, generation: u64) {
        let Some(handler) = self.handler() else {
            return;
        };
        self.inner.busy.set(true);

        let minimum = self.inner.config.minimum_firmware.clone();
        let id_handler = handler.clone();
        let reset_handler = handler.clone();
        let info = handler
            .get(DeviceParameter::Version)
            .then(move |version| {
                check_firmware(version, &minimum)?;
                Ok(version.clone())
            })
            .then_chain(move |version| {
                let version = version.clone();
                id_handler
                    .get(DeviceParameter::DeviceId)
                    .then(move |id| {
                        Ok(DeviceInfo {
                            version,
                            device_id: parse_device_id(id)?,
                        })
                    })
            })
            .then_chain(move |info| {
                let info = info.clone();
                reset_handler.reset_state().then(move |_| Ok(info))
            });

        let weak = Rc::downgrade(&self.inner);
        info.when_settled(move |result| {
            let Some(session) = Self::from_weak(&weak) else {
                return;
            };
            if session.inner.generation.get() != generation {
                return;
            }
            session.inner.busy.set(false);
            match result {
                Ok(info) => {
                    tracing::info!(
                        "device {:x} ready, firmware {}",
                        info.device_id,
                        info.version
                    );
                    if let Some(tracked) = session.inner.device.borrow_mut().as_mut() {
                        tracked.info = Some(info.clone());
                    }
                    session.set_state(SessionState::SessionClosed, None);
                    session.pump();
                }
                Err(e) => session.abandon(e.clone()),
            }
        });
    }

    /// Gives up on the tracked device after a failed handshake or reset.
    fn abandon(&self, error: Error) {
        let identity = self.tracked_device();
        tracing::warn!("resynchronization failed: {}", error);
        let retry = !matches!(error, Error::FirmwareNotSupported { .. });
        self.drop_device(error);
        if retry {
            *self.inner.retry.borrow_mut() = identity;
        }
    }

    /// Re-aligns with the device after a state-changing command failed.
    fn resynchronize(&self, error: &Error) {
        let Some(handler) = self.handler() else {
            return;
        };
        let generation = self.inner.generation.get();
        self.inner.busy.set(true);
        self.inner.unconfirmed_payment.set(false);
        self.set_state(SessionState::Resynchronizing, Some(error.clone()));
        self.reject_queue(&Error::Cancelled);
        self.reject_awaits(error);

        let weak = Rc::downgrade(&self.inner);
        handler.reset_state().when_settled(move |result| {
            let Some(session) = Self::from_weak(&weak) else {
                return;
            };
            if session.inner.generation.get() != generation {
                return;
            }
            session.inner.busy.set(false);
            match result {
                Ok(()) => {
                    session.set_state(SessionState::SessionClosed, None);
                    session.pump();
                }
                Err(e) => session.abandon(e.clone()),
            }
        });
    }

    // Queue

    /// Admits an operation: checks it against the current state, moves the
    /// state, builds the completion with `install` and queues it.
    fn enqueue(
        &self,
        kind: OperationKind,
        command: Command,
        install: impl FnOnce(&Self) -> Completion,
    ) -> Result<()> {
        let _entered = self.inner.config.span.enter();

        let state = self.state();
        let Some(next) = kind.admit(state, self.inner.unconfirmed_payment.get()) else {
            tracing::debug!("{} rejected in {:?}", kind.name(), state);
            return Err(Error::InvalidState {
                operation: kind.name(),
                state,
            });
        };
        tracing::debug!("queueing {}", command);

        self.set_state(next, None);
        if matches!(
            kind,
            OperationKind::CreatePayment
                | OperationKind::CloseSession
                | OperationKind::ConfirmPayment
                | OperationKind::CancelPayment
        ) {
            self.inner.unconfirmed_payment.set(false);
        }
        let completion = install(self);
        self.inner.queue.borrow_mut().push_back(PendingOperation {
            kind,
            command,
            completion,
        });

        if kind == OperationKind::CancelPayment {
            self.reject_await(AwaitKind::Payment, &Error::Cancelled);
            self.reject_await(AwaitKind::Token, &Error::Cancelled);
        }

        self.pump();
        Ok(())
    }

    /// Submits the next queued operation unless one is in flight.
    fn pump(&self) {
        if self.inner.busy.get() {
            return;
        }
        let Some(handler) = self.handler() else {
            return;
        };
        let Some(operation) = self.inner.queue.borrow_mut().pop_front() else {
            return;
        };

        self.inner.busy.set(true);
        let generation = self.inner.generation.get();
        let weak = Rc::downgrade(&self.inner);
        operation
            .completion
            .submit(&handler, &operation.command)
            .when_settled(move |result| {
                let result = result.cloned().map_err(Clone::clone);
                match Self::from_weak(&weak) {
                    Some(session) => session.finish(operation, generation, result),
                    None => operation.completion.reject(Error::DeviceLost),
                }
            });
    }

    fn finish(
        &self,
        operation: PendingOperation,
        generation: u64,
        result: Result<AckValue>,
    ) {
        if self.inner.generation.get() != generation {
            // device already dropped; awaits were rejected with it
            operation
                .completion
                .reject(result.err().unwrap_or(Error::DeviceLost));
            return;
        }
        self.inner.busy.set(false);

        match result {
            Ok(value) => {
                tracing::debug!("{} acknowledged", operation.command.verb);
                self.acknowledged(operation.kind);
                operation.completion.resolve(value);
            }
            Err(e) => {
                tracing::warn!("{} failed: {}", operation.command.verb, e);
                if operation.kind.changes_state() {
                    self.resynchronize(&e);
                }
                operation.completion.reject(e);
            }
        }
        self.pump();
    }

    fn acknowledged(&self, kind: OperationKind) {
        if kind == OperationKind::ConfirmPayment {
            self.set_state(SessionState::SessionClosed, None);
        }
    }

    fn reject_queue(&self, error: &Error) {
        let queued: Vec<_> = self.inner.queue.borrow_mut().drain(..).collect();
        for operation in queued {
            tracing::debug!("discarding queued {}: {}", operation.command, error);
            match operation.completion {
                Completion::Await(kind) => self.reject_await(kind, error),
                completion => completion.reject(error.clone()),
            }
        }
    }

    fn reject_await(&self, kind: AwaitKind, error: &Error) {
        let mut awaits = self.inner.awaits.borrow_mut();
        match kind {
            AwaitKind::Barcodes => {
                let barcodes = awaits.barcodes.take();
                drop(awaits);
                reject_pending(barcodes, error);
            }
            AwaitKind::Payment => {
                let payment = awaits.payment.take();
                drop(awaits);
                reject_pending(payment, error);
            }
            AwaitKind::Token => {
                let token = awaits.token.take();
                drop(awaits);
                reject_pending(token, error);
            }
        }
    }

    fn reject_awaits(&self, error: &Error) {
        let awaits = std::mem::take(&mut *self.inner.awaits.borrow_mut());
        reject_pending(awaits.barcodes, error);
        reject_pending(awaits.payment, error);
        reject_pending(awaits.token, error);
    }

    // Events

    fn handle_event(&self, event: &Event) {
        let state = self.state();
        match event {
            Event::Barcodes(barcodes) => {
                let pending = self.inner.awaits.borrow_mut().barcodes.take();
                if state == SessionState::AwaitingBarcodes {
                    self.set_state(SessionState::SessionOpened, None);
                }
                match pending.filter(Deferred::is_pending) {
                    Some(pending) => pending.resolve(barcodes.clone()),
                    None => tracing::warn!("unsolicited barcodes: {:?}", barcodes),
                }
            }
            Event::PaymentSuccessful => {
                let pending = self.inner.awaits.borrow_mut().payment.take();
                if state == SessionState::AwaitingPaymentResult {
                    self.inner.unconfirmed_payment.set(true);
                    self.set_state(SessionState::SessionOpened, None);
                }
                match pending.filter(Deferred::is_pending) {
                    Some(pending) => pending.resolve(()),
                    None => tracing::warn!("unsolicited payment result"),
                }
            }
            Event::PaymentError(code) => {
                let (payment, token) = {
                    let mut awaits = self.inner.awaits.borrow_mut();
                    (awaits.payment.take(), awaits.token.take())
                };
                if matches!(
                    state,
                    SessionState::AwaitingPaymentResult | SessionState::AwaitingPaymentToken
                ) {
                    self.set_state(SessionState::SessionOpened, None);
                }
                tracing::info!("payment failed: {:?}", code);
                reject_pending(payment, &Error::Payment(*code));
                reject_pending(token, &Error::Payment(*code));
            }
            Event::PaymentToken(token) => {
                let pending = self.inner.awaits.borrow_mut().token.take();
                if state == SessionState::AwaitingPaymentToken {
                    self.set_state(SessionState::SessionOpened, None);
                }
                match pending.filter(Deferred::is_pending) {
                    Some(pending) => pending.resolve(token.clone()),
                    None => tracing::warn!("unsolicited payment token"),
                }
            }
            Event::MobileConnected | Event::MobileDisconnected => {
                self.inner
                    .mobile_connected
                    .set(event.mobile() == Some(MobileEvent::Connected));
                self.notify(event);
            }
            Event::SystemReset => {
                tracing::warn!("device reported a reset");
                self.notify(event);
            }
            Event::NfcDetected(card) => {
                *self.inner.nfc_card.borrow_mut() = Some(card.clone());
                self.notify(event);
            }
            Event::NfcRemoved | Event::NfcDetectionError(_) => {
                self.inner.nfc_card.take();
                self.notify(event);
            }
        }
    }

    fn notify(&self, event: &Event) {
        tracing::debug!("notification: {:?}", event);
        self.inner
            .dispatcher
            .dispatch(SessionEvent::Device(event.clone()));
    }

    // Client operations

    fn unit(&self, kind: OperationKind, command: Command) -> Result<Deferred<()>> {
        let done = Deferred::new();
        let sink = done.clone();
        self.enqueue(kind, command, move |_| Completion::Unit(sink))?;
        Ok(done)
    }

    /// Opens a session. Allowed in `SessionClosed`.
    pub fn open_session(&self) -> Result<Deferred<()>> {
        self.unit(OperationKind::OpenSession, Command::open_session())
    }

    /// Closes the session. Allowed in `SessionOpened`.
    pub fn close_session(&self) -> Result<Deferred<()>> {
        self.unit(OperationKind::CloseSession, Command::close_session())
    }

    /// Requests barcodes from the phone. The deferred resolves with the
    /// scanned barcodes, or with an empty list if capture is cancelled.
    pub fn request_barcodes(&self) -> Result<Deferred<Vec<Barcode>>> {
        let barcodes = Deferred::new();
        let sink = barcodes.clone();
        self.enqueue(
            OperationKind::RequestBarcodes,
            Command::request_barcodes(),
            move |session| {
                let previous = session.inner.awaits.borrow_mut().barcodes.replace(sink);
                reject_pending(previous, &Error::Cancelled);
                Completion::Await(AwaitKind::Barcodes)
            },
        )?;
        Ok(barcodes)
    }

    /// Cancels barcode capture. Allowed in `AwaitingBarcodes`.
    pub fn cancel_barcodes(&self) -> Result<Deferred<()>> {
        let done = Deferred::new();
        let sink = done.clone();
        self.enqueue(
            OperationKind::CancelBarcodes,
            Command::cancel_barcodes(),
            move |session| Completion::CancelBarcodes {
                done: sink,
                barcodes: session.inner.awaits.borrow_mut().barcodes.take(),
            },
        )?;
        Ok(done)
    }

    /// Starts a payment. The deferred resolves on `PAYMENT_SUCCESSFUL` and
    /// rejects with [`Error::Payment`] on `PAYMENT_ERROR`.
    pub fn create_payment(&self, request: &PaymentRequest) -> Result<Deferred<()>> {
        let payment = Deferred::new();
        let sink = payment.clone();
        self.enqueue(
            OperationKind::CreatePayment,
            Command::create_payment(request),
            move |session| {
                let previous = session.inner.awaits.borrow_mut().payment.replace(sink);
                reject_pending(previous, &Error::Cancelled);
                Completion::Await(AwaitKind::Payment)
            },
        )?;
        Ok(payment)
    }

    /// Requests a payment token. The deferred resolves with the token.
    pub fn create_payment_token(&self, request: &PaymentRequest) -> Result<Deferred<String>> {
        let token = Deferred::new();
        let sink = token.clone();
        self.enqueue(
            OperationKind::CreatePaymentToken,
            Command::create_payment_token(request),
            move |session| {
                let previous = session.inner.awaits.borrow_mut().token.replace(sink);
                reject_pending(previous, &Error::Cancelled);
                Completion::Await(AwaitKind::Token)
            },
        )?;
        Ok(token)
    }

    /// Confirms a successful payment. The device closes the session.
    pub fn confirm_payment(&self) -> Result<Deferred<()>> {
        self.unit(OperationKind::ConfirmPayment, Command::confirm_payment())
    }

    /// Cancels the outstanding payment or token request, or discards an
    /// unconfirmed payment. The outstanding deferred rejects with
    /// [`Error::Cancelled`].
    pub fn cancel_payment(&self) -> Result<Deferred<()>> {
        self.unit(OperationKind::CancelPayment, Command::cancel_payment())
    }

    /// Reads a device parameter.
    pub fn get(&self, parameter: DeviceParameter) -> Result<Deferred<String>> {
        let value = Deferred::new();
        let sink = value.clone();
        self.enqueue(OperationKind::Get, Command::get(parameter), move |_| {
            Completion::Value(sink)
        })?;
        Ok(value)
    }

    /// Writes a device parameter.
    pub fn set(&self, parameter: DeviceParameter, value: &str) -> Result<Deferred<()>> {
        self.unit(OperationKind::Set, Command::set(parameter, value))
    }

    /// Enables or disables a radio interface. Allowed in `SessionClosed`.
    pub fn set_interface(&self, interface: Interface, enabled: bool) -> Result<Deferred<()>> {
        self.unit(
            OperationKind::SetInterface,
            Command::set_interface(interface, enabled),
        )
    }

    /// Enters a private mode.
    pub fn begin_private(&self, mode: BeginPrivateMode) -> Result<Deferred<()>> {
        self.unit(OperationKind::BeginPrivate, Command::begin_private(mode))
    }

    /// Commits private-mode changes with `signature`.
    pub fn commit(&self, signature: &str) -> Result<Deferred<()>> {
        self.unit(OperationKind::Commit, Command::commit(signature))
    }

    /// Queries the device's own session flags.
    pub fn get_state(&self) -> Result<Deferred<DeviceState>> {
        let state = Deferred::new();
        let sink = state.clone();
        self.enqueue(OperationKind::GetState, Command::get_state(), move |_| {
            Completion::State(sink)
        })?;
        Ok(state)
    }
}

fn reject_pending<T>(deferred: Option<Deferred<T>>, error: &Error) {
    if let Some(deferred) = deferred.filter(Deferred::is_pending) {
        deferred.reject(error.clone());
    }
}

fn check_firmware(version: &str, minimum: &str) -> Result<()> {
    let required: FirmwareVersion = minimum.parse()?;
    // an unreadable version ranks below every minimum
    let supported = version
        .parse::<FirmwareVersion>()
        .is_ok_and(|reported| reported >= required);
    if !supported {
        return Err(Error::FirmwareNotSupported {
            version: version.to_string(),
            minimum: minimum.to_string(),
        });
    }
    Ok(())
}
