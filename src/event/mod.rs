//! Event system for device notifications and session state changes.
//!
//! Device events are parsed from unsolicited protocol lines. The session
//! consumes the ones that settle client operations and re-broadcasts state
//! changes and pure notifications as [`SessionEvent`]s to any number of
//! subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::protocol::Verb;
use crate::session::SessionState;
use crate::types::{Barcode, MobileEvent, NfcDetection, NfcDetectionError, PaymentError};

/// Unsolicited event sent by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A phone connected to the device.
    MobileConnected,
    /// The phone disconnected.
    MobileDisconnected,
    /// Barcodes scanned from the phone.
    Barcodes(Vec<Barcode>),
    /// The outstanding payment succeeded.
    PaymentSuccessful,
    /// The outstanding payment or token request failed.
    PaymentError(PaymentError),
    /// Token produced by `CREATE_PAYMENT_TOKEN`.
    PaymentToken(String),
    /// NFC card entered the field.
    NfcDetected(NfcDetection),
    /// NFC card left the field.
    NfcRemoved,
    /// NFC detection failed.
    NfcDetectionError(NfcDetectionError),
    /// The device rebooted.
    SystemReset,
}

impl Event {
    /// Returns the verb this event is sent with.
    #[must_use]
    pub const fn verb(&self) -> Verb {
        match self {
            Self::MobileConnected => Verb::MobileConnected,
            Self::MobileDisconnected => Verb::MobileDisconnected,
            Self::Barcodes(_) => Verb::Barcodes,
            Self::PaymentSuccessful => Verb::PaymentSuccessful,
            Self::PaymentError(_) => Verb::PaymentError,
            Self::PaymentToken(_) => Verb::PaymentToken,
            Self::NfcDetected(_) => Verb::NfcDetected,
            Self::NfcRemoved => Verb::NfcRemoved,
            Self::NfcDetectionError(_) => Verb::NfcDetectionError,
            Self::SystemReset => Verb::SystemReset,
        }
    }

    /// Returns the phone connection change this event reports, if any.
    #[must_use]
    pub const fn mobile(&self) -> Option<MobileEvent> {
        match self {
            Self::MobileConnected => Some(MobileEvent::Connected),
            Self::MobileDisconnected => Some(MobileEvent::Disconnected),
            _ => None,
        }
    }
}

/// Event broadcast by a session to its subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session state changed. `error` is set when the change was caused
    /// by a failure (handshake error, device lost).
    StateChanged {
        state: SessionState,
        error: Option<Error>,
    },
    /// A device notification that does not settle any operation.
    Device(Event),
    /// A line from the device could not be understood.
    ProtocolError(Error),
}

/// Discriminant of a [`SessionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    StateChanged,
    Device,
    ProtocolError,
}

impl SessionEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> SessionEventKind {
        match self {
            Self::StateChanged { .. } => SessionEventKind::StateChanged,
            Self::Device(_) => SessionEventKind::Device,
            Self::ProtocolError(_) => SessionEventKind::ProtocolError,
        }
    }
}

/// Subscription filter for specific event types.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<SessionEventKind>>,
    /// Filter for a specific target state.
    pub state: Option<SessionState>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<SessionEventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            state: None,
        }
    }

    /// Creates a filter for transitions into `state`.
    #[must_use]
    pub fn state(state: SessionState) -> Self {
        Self {
            kinds: Some(vec![SessionEventKind::StateChanged]),
            state: Some(state),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &SessionEvent) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(expected) = self.state {
            let SessionEvent::StateChanged { state, .. } = event else {
                return false;
            };
            if *state != expected {
                return false;
            }
        }

        true
    }
}

/// A subscription to session events.
pub struct Subscription {
    receiver: broadcast::Receiver<SessionEvent>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next matching event.
    ///
    /// Returns `None` once the dispatcher is gone. Events missed because the
    /// subscriber lagged behind are skipped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<SessionEvent>,
}

/// Dispatches session events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Default broadcast capacity.
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: SessionEvent) {
        // no receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events, optionally filtered.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            filter,
        }
    }

    /// Waits for an event matching the filter.
    ///
    /// Only events dispatched after this call are considered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if nothing matches in time, or
    /// [`Error::Cancelled`] if the dispatcher is dropped.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Result<SessionEvent> {
        let mut subscription = self.subscribe(Some(filter));

        tokio::select! {
            biased;
            event = subscription.recv() => event.ok_or(Error::Cancelled),
            () = tokio::time::sleep(timeout) => Err(Error::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::default();
        let mut sub = dispatcher.subscribe(None);

        dispatcher.dispatch(SessionEvent::Device(Event::MobileConnected));

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert!(matches!(
            event,
            Some(SessionEvent::Device(Event::MobileConnected))
        ));
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips() {
        let dispatcher = EventDispatcher::default();
        let mut sub = dispatcher.subscribe(Some(EventFilter::state(SessionState::SessionClosed)));

        dispatcher.dispatch(SessionEvent::Device(Event::NfcRemoved));
        dispatcher.dispatch(SessionEvent::StateChanged {
            state: SessionState::Resynchronizing,
            error: None,
        });
        dispatcher.dispatch(SessionEvent::StateChanged {
            state: SessionState::SessionClosed,
            error: None,
        });

        let event = sub.recv().await.unwrap();
        assert!(matches!(
            event,
            SessionEvent::StateChanged {
                state: SessionState::SessionClosed,
                ..
            }
        ));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::kinds(vec![SessionEventKind::ProtocolError]);
        assert!(filter.matches(&SessionEvent::ProtocolError(Error::protocol("x"))));
        assert!(!filter.matches(&SessionEvent::Device(Event::SystemReset)));

        let filter = EventFilter::state(SessionState::NoDevice);
        assert!(filter.matches(&SessionEvent::StateChanged {
            state: SessionState::NoDevice,
            error: Some(Error::DeviceLost),
        }));
        assert!(!filter.matches(&SessionEvent::StateChanged {
            state: SessionState::SessionOpened,
            error: None,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_timeout() {
        let dispatcher = EventDispatcher::default();
        let result = dispatcher
            .wait_for(EventFilter::default(), Duration::from_millis(250))
            .await;
        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 250 })));
    }

    #[test]
    fn test_event_verbs() {
        assert_eq!(Event::PaymentToken("t".into()).verb(), Verb::PaymentToken);
        assert_eq!(Event::Barcodes(Vec::new()).verb(), Verb::Barcodes);
        assert_eq!(Event::MobileDisconnected.mobile(), Some(MobileEvent::Disconnected));
        assert_eq!(Event::NfcRemoved.mobile(), None);
    }
}
