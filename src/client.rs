//! Main [`Client`] implementation.
//!
//! This module provides the high-level [`Client`] that binds presence
//! detection, transports and the [`SessionManager`] together. The session
//! is single-threaded: a client must be created inside a
//! [`tokio::task::LocalSet`], and its driver task runs there with it.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::deferred::Deferred;
use crate::error::Result;
use crate::event::{EventFilter, Subscription};
use crate::presence::{PortWatcher, PresenceEvent, WatcherConfig};
use crate::protocol::{BeginPrivateMode, DeviceParameter, Interface};
use crate::session::{SessionConfig, SessionManager, SessionState};
use crate::transport::{Inbound, SerialConfig, SerialProvider, TransportProvider};
use crate::types::{
    Barcode, DeviceIdentity, DeviceInfo, DeviceState, NfcDetection, PaymentRequest,
};

/// Client for jetbeep devices.
///
/// Every operation returns immediately with a [`Deferred`]; awaiting it (or
/// registering continuations) must happen on the same `LocalSet`.
pub struct Client {
    session: SessionManager,
    driver: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
}

impl Client {
    /// Creates a client for serial devices found by polling the host's
    /// USB ports.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `LocalSet`.
    #[must_use]
    pub fn serial(serial: SerialConfig, watcher: WatcherConfig, session: SessionConfig) -> Self {
        let (presence, watcher) = PortWatcher::new(watcher).spawn();
        let mut client = Self::new(SerialProvider::new(serial), session, presence);
        client.watcher = Some(watcher);
        client
    }

    /// Creates a client opening devices through `provider` and tracking the
    /// devices reported on `presence`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `LocalSet`.
    #[must_use]
    pub fn new(
        provider: impl TransportProvider + 'static,
        config: SessionConfig,
        presence: mpsc::UnboundedReceiver<PresenceEvent>,
    ) -> Self {
        let (session, inbound) = SessionManager::new(provider, config);
        let driver = tokio::task::spawn_local(drive(session.clone(), presence, inbound));
        Self {
            session,
            driver,
            watcher: None,
        }
    }

    /// The underlying session.
    #[must_use]
    pub const fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Version and id of the tracked device, once the handshake is done.
    #[must_use]
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.session.device_info()
    }

    /// Identity of the tracked device.
    #[must_use]
    pub fn tracked_device(&self) -> Option<DeviceIdentity> {
        self.session.tracked_device()
    }

    /// Whether a phone is connected to the device.
    #[must_use]
    pub fn is_mobile_connected(&self) -> bool {
        self.session.is_mobile_connected()
    }

    /// Whether an NFC card is in the device's field.
    #[must_use]
    pub fn is_nfc_detected(&self) -> bool {
        self.session.is_nfc_detected()
    }

    /// The card currently in the field.
    #[must_use]
    pub fn nfc_card(&self) -> Option<NfcDetection> {
        self.session.nfc_card()
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.session.subscribe(None)
    }

    /// Subscribes to session events matching `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: EventFilter) -> Subscription {
        self.session.subscribe(Some(filter))
    }

    // ==================== Session Operations ====================

    pub fn open_session(&self) -> Result<Deferred<()>> {
        self.session.open_session()
    }

    pub fn close_session(&self) -> Result<Deferred<()>> {
        self.session.close_session()
    }

    pub fn request_barcodes(&self) -> Result<Deferred<Vec<Barcode>>> {
        self.session.request_barcodes()
    }

    pub fn cancel_barcodes(&self) -> Result<Deferred<()>> {
        self.session.cancel_barcodes()
    }

    pub fn create_payment(&self, request: &PaymentRequest) -> Result<Deferred<()>> {
        self.session.create_payment(request)
    }

    pub fn create_payment_token(&self, request: &PaymentRequest) -> Result<Deferred<String>> {
        self.session.create_payment_token(request)
    }

    pub fn confirm_payment(&self) -> Result<Deferred<()>> {
        self.session.confirm_payment()
    }

    pub fn cancel_payment(&self) -> Result<Deferred<()>> {
        self.session.cancel_payment()
    }

    // ==================== Device Parameters ====================

    pub fn get(&self, parameter: DeviceParameter) -> Result<Deferred<String>> {
        self.session.get(parameter)
    }

    pub fn set(&self, parameter: DeviceParameter, value: &str) -> Result<Deferred<()>> {
        self.session.set(parameter, value)
    }

    /// Enables or disables Bluetooth or NFC. Only allowed while no session
    /// is open.
    pub fn set_interface(&self, interface: Interface, enabled: bool) -> Result<Deferred<()>> {
        self.session.set_interface(interface, enabled)
    }

    pub fn begin_private(&self, mode: BeginPrivateMode) -> Result<Deferred<()>> {
        self.session.begin_private(mode)
    }

    pub fn commit(&self, signature: &str) -> Result<Deferred<()>> {
        self.session.commit(signature)
    }

    pub fn get_state(&self) -> Result<Deferred<DeviceState>> {
        self.session.get_state()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Abort background tasks
        self.driver.abort();
        if let Some(task) = self.watcher.take() {
            task.abort();
        }
    }
}

/// Feeds presence and transport input into the session and re-attaches
/// devices whose attachment failed.
async fn drive(
    session: SessionManager,
    mut presence: mpsc::UnboundedReceiver<PresenceEvent>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    let delay = session.config().retry_delay;
    let mut presence_open = true;
    let mut retry: Option<(DeviceIdentity, Instant)> = None;

    loop {
        let deadline = retry.as_ref().map(|(_, at)| *at);
        tokio::select! {
            event = presence.recv(), if presence_open => match event {
                Some(PresenceEvent::Attached(identity)) => {
                    retry = None;
                    session.attach(identity);
                }
                Some(PresenceEvent::Detached(identity)) => {
                    if retry.as_ref().is_some_and(|(pending, _)| *pending == identity) {
                        retry = None;
                    }
                    session.detach(&identity);
                }
                None => {
                    tracing::debug!("presence channel closed");
                    presence_open = false;
                }
            },
            message = inbound.recv() => match message {
                Some(message) => session.handle_inbound(message),
                None => break,
            },
            () = sleep_until(deadline), if deadline.is_some() => {
                if let Some((identity, _)) = retry.take() {
                    tracing::info!("retrying {}", identity);
                    session.attach(identity);
                }
            }
        }

        if let Some(identity) = session.take_retry_candidate() {
            tracing::debug!("retrying {} in {:?}", identity, delay);
            retry = Some((identity, Instant::now() + delay));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
