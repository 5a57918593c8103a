//! # jetbeep
//!
//! A Rust host library for JetBeep USB/serial payment and barcode devices.
//!
//! The device speaks a line-oriented text protocol: the host sends one
//! command at a time and waits for its acknowledgement, while the device
//! interleaves unsolicited events (scanned barcodes, payment results,
//! phone and NFC notifications).
//!
//! ## Features
//!
//! - Single-threaded session state machine driven on a Tokio `LocalSet`
//! - [`Deferred`] results with continuation chaining, awaitable at the edge
//! - Automatic handshake, resynchronization and re-attachment
//! - Broadcast event subscriptions
//!
//! ## Quick Start
//!
//! ```no_run
//! use jetbeep::{Client, PaymentRequest, SerialConfig, SessionConfig, SessionState, WatcherConfig};
//! use jetbeep::event::EventFilter;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), jetbeep::Error> {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let client = Client::serial(
//!                 SerialConfig::default(),
//!                 WatcherConfig::default(),
//!                 SessionConfig::default(),
//!             );
//!
//!             // Wait until a device is attached and ready
//!             let mut ready = client.subscribe_filtered(EventFilter::state(SessionState::SessionClosed));
//!             ready.recv().await;
//!
//!             client.open_session()?.await?;
//!             client
//!                 .create_payment(&PaymentRequest::new(1250, "order-17"))?
//!                 .await?;
//!             client.confirm_payment()?.await?;
//!             Ok(())
//!         })
//!         .await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`deferred`] - Single-threaded result cell with continuations
//! - [`protocol`] - Line codec, verbs, parsers and the protocol engine
//! - [`commands`] - Typed command handler
//! - [`transport`] - Transport traits and the serial implementation
//! - [`presence`] - Polling USB port watcher
//! - [`session`] - Session state machine and operation queue
//! - [`event`] - Event broadcast and subscriptions
//! - [`client`] - High-level [`Client`]
//! - [`registry`] - Integer handles for sessions

pub mod client;
pub mod commands;
pub mod deferred;
pub mod error;
pub mod event;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::Client;
pub use commands::{Command, CommandHandler};
pub use deferred::{Deferred, DeferredState};
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, SessionEvent, SessionEventKind, Subscription};
pub use presence::{PortWatcher, PresenceEvent, WatcherConfig};
pub use protocol::{BeginPrivateMode, DeviceParameter, Interface, ProtocolEngine, Verb};
pub use registry::SessionRegistry;
pub use session::{SessionConfig, SessionManager, SessionState};
pub use transport::{SerialConfig, SerialProvider, Transport, TransportProvider, serial::list_ports};
pub use types::{
    Barcode, BarcodeType, DeviceIdentity, DeviceInfo, DeviceState, FirmwareVersion, MobileEvent,
    NfcCardType, NfcDetection, NfcDetectionError, PaymentError, PaymentMetadata, PaymentRequest,
};
