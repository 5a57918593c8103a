//! Verbs and argument layouts of the jetbeep protocol.
//!
//! Every line starts with a verb. Commands are sent by the host and
//! acknowledged by the device with a line starting with the same verb;
//! events are sent by the device on its own.

use std::fmt;

use crate::types::{PaymentMetadata, PaymentRequest};

/// First token of a protocol line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    // Commands
    OpenSession,
    CloseSession,
    RequestBarcodes,
    CancelBarcodes,
    CreatePayment,
    CreatePaymentToken,
    ConfirmPayment,
    CancelPayment,
    ResetState,
    Get,
    Set,
    BeginPrivate,
    Commit,
    GetState,

    // Events
    MobileConnected,
    MobileDisconnected,
    Barcodes,
    PaymentSuccessful,
    PaymentError,
    PaymentToken,
    NfcDetected,
    NfcRemoved,
    NfcDetectionError,
    SystemReset,
}

impl Verb {
    const ALL: [Self; 24] = [
        Self::OpenSession,
        Self::CloseSession,
        Self::RequestBarcodes,
        Self::CancelBarcodes,
        Self::CreatePayment,
        Self::CreatePaymentToken,
        Self::ConfirmPayment,
        Self::CancelPayment,
        Self::ResetState,
        Self::Get,
        Self::Set,
        Self::BeginPrivate,
        Self::Commit,
        Self::GetState,
        Self::MobileConnected,
        Self::MobileDisconnected,
        Self::Barcodes,
        Self::PaymentSuccessful,
        Self::PaymentError,
        Self::PaymentToken,
        Self::NfcDetected,
        Self::NfcRemoved,
        Self::NfcDetectionError,
        Self::SystemReset,
    ];

    /// Returns the wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenSession => "OPEN_SESSION",
            Self::CloseSession => "CLOSE_SESSION",
            Self::RequestBarcodes => "REQUEST_BARCODES",
            Self::CancelBarcodes => "CANCEL_BARCODES",
            Self::CreatePayment => "CREATE_PAYMENT",
            Self::CreatePaymentToken => "CREATE_PAYMENT_TOKEN",
            Self::ConfirmPayment => "CONFIRM_PAYMENT",
            Self::CancelPayment => "CANCEL_PAYMENT",
            Self::ResetState => "RESET_STATE",
            Self::Get => "GET",
            Self::Set => "SET",
            Self::BeginPrivate => "BEGIN_PRIVATE",
            Self::Commit => "COMMIT",
            Self::GetState => "GETSTATE",
            Self::MobileConnected => "MOBILE_CONNECTED",
            Self::MobileDisconnected => "MOBILE_DISCONNECTED",
            Self::Barcodes => "BARCODES",
            Self::PaymentSuccessful => "PAYMENT_SUCCESSFUL",
            Self::PaymentError => "PAYMENT_ERROR",
            Self::PaymentToken => "PAYMENT_TOKEN",
            Self::NfcDetected => "NFC_DETECTED",
            Self::NfcRemoved => "NFC_REMOVED",
            Self::NfcDetectionError => "NFC_DETECTION_ERROR",
            Self::SystemReset => "SYSTEM_RESET",
        }
    }

    /// Looks up a verb by its exact wire spelling.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.as_str() == token)
    }

    /// Returns true for verbs the device sends unsolicited.
    #[must_use]
    pub const fn is_event(self) -> bool {
        matches!(
            self,
            Self::MobileConnected
                | Self::MobileDisconnected
                | Self::Barcodes
                | Self::PaymentSuccessful
                | Self::PaymentError
                | Self::PaymentToken
                | Self::NfcDetected
                | Self::NfcRemoved
                | Self::NfcDetectionError
                | Self::SystemReset
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named parameters readable with `GET` and writable with `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceParameter {
    Version,
    ShopId,
    DeviceId,
    Mode,
    PubKey,
    ChipId,
    Revision,
    PaymentPubKey,
    ShopKey,
    CashierId,
    TxPower,
    TapSensitivity,
    PhoneConFeedback,
    ProximitySensitivity,
    MobileAppsUuids,
    Mac,
    DevEnv,
    ConnectionRole,
    LogLevel,
    MerchantId,
    DomainShopId,
    VirtKeyboard,
    Nfc,
    Bluetooth,
}

impl DeviceParameter {
    const NAMES: [(Self, &'static str); 24] = [
        (Self::Version, "version"),
        (Self::ShopId, "shopId"),
        (Self::DeviceId, "deviceId"),
        (Self::Mode, "mode"),
        (Self::PubKey, "pubKey"),
        (Self::ChipId, "chipId"),
        (Self::Revision, "revision"),
        (Self::PaymentPubKey, "paymentPubKey"),
        (Self::ShopKey, "shopKey"),
        (Self::CashierId, "cashierId"),
        (Self::TxPower, "txPower"),
        (Self::TapSensitivity, "tapSensitivity"),
        (Self::PhoneConFeedback, "phoneConFeedback"),
        (Self::ProximitySensitivity, "proximitySensitivity"),
        (Self::MobileAppsUuids, "mobileAppsUUIDs"),
        (Self::Mac, "mac"),
        (Self::DevEnv, "devEnv"),
        (Self::ConnectionRole, "connectionRole"),
        (Self::LogLevel, "logLevel"),
        (Self::MerchantId, "merchantId"),
        (Self::DomainShopId, "domainShopId"),
        (Self::VirtKeyboard, "virtKeyboard"),
        (Self::Nfc, "nfc"),
        (Self::Bluetooth, "bluetooth"),
    ];

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(param, _)| *param == self)
            .map_or("", |(_, name)| name)
    }

    /// Looks up a parameter by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(param, _)| *param)
    }
}

impl fmt::Display for DeviceParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument of `BEGIN_PRIVATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginPrivateMode {
    Setup,
    Config,
}

impl BeginPrivateMode {
    /// Returns the wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Config => "config",
        }
    }
}

/// Radio interfaces that can be toggled with `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Bluetooth,
    Nfc,
}

impl Interface {
    /// The parameter that controls this interface.
    #[must_use]
    pub const fn parameter(self) -> DeviceParameter {
        match self {
            Self::Bluetooth => DeviceParameter::Bluetooth,
            Self::Nfc => DeviceParameter::Nfc,
        }
    }

    /// Value written to enable or disable the interface.
    #[must_use]
    pub const fn value(enabled: bool) -> &'static str {
        if enabled { "enabled" } else { "disabled" }
    }
}

/// Encodes metadata as `key:value` pairs joined by `;`.
///
/// Nothing is escaped. A key or value containing `:`, `;` or a space
/// produces a line the device splits differently.
#[must_use]
pub fn encode_metadata(metadata: &PaymentMetadata) -> String {
    metadata
        .iter()
        .map(|(key, value)| format!("{key}:{value}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Encodes the argument list of `CREATE_PAYMENT` / `CREATE_PAYMENT_TOKEN`:
/// `<amount> <transactionId>[ <cashierId>[ <metadata>]]`.
///
/// Metadata is only written when a cashier id is present, since the device
/// reads arguments positionally.
#[must_use]
pub fn encode_payment_args(request: &PaymentRequest) -> String {
    let mut args = format!("{} {}", request.amount, request.transaction_id);
    if let Some(cashier) = &request.cashier_id {
        args.push(' ');
        args.push_str(cashier);
        if !request.metadata.is_empty() {
            args.push(' ');
            args.push_str(&encode_metadata(&request.metadata));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_spelling() {
        assert_eq!(Verb::GetState.as_str(), "GETSTATE");
        assert_eq!(Verb::from_token("CREATE_PAYMENT_TOKEN"), Some(Verb::CreatePaymentToken));
        assert_eq!(Verb::from_token("open_session"), None);
        assert_eq!(Verb::from_token("HELLO"), None);
        for verb in Verb::ALL {
            assert_eq!(Verb::from_token(verb.as_str()), Some(verb));
        }
    }

    #[test]
    fn test_event_classification() {
        assert!(Verb::Barcodes.is_event());
        assert!(Verb::SystemReset.is_event());
        assert!(!Verb::OpenSession.is_event());
        assert!(!Verb::Get.is_event());
    }

    #[test]
    fn test_device_parameter_names() {
        assert_eq!(DeviceParameter::MobileAppsUuids.as_str(), "mobileAppsUUIDs");
        assert_eq!(DeviceParameter::from_name("deviceId"), Some(DeviceParameter::DeviceId));
        assert_eq!(DeviceParameter::from_name("deviceid"), None);
        for (param, name) in DeviceParameter::NAMES {
            assert_eq!(param.as_str(), name);
        }
    }

    #[test]
    fn test_interface_values() {
        assert_eq!(Interface::Nfc.parameter(), DeviceParameter::Nfc);
        assert_eq!(Interface::value(true), "enabled");
        assert_eq!(Interface::value(false), "disabled");
        assert_eq!(BeginPrivateMode::Config.as_str(), "config");
    }

    #[test]
    fn test_payment_args() {
        let plain = PaymentRequest::new(1500, "tx-1");
        assert_eq!(encode_payment_args(&plain), "1500 tx-1");

        let with_meta = PaymentRequest::new(1500, "tx-1")
            .cashier("c7")
            .meta("b", "2")
            .meta("a", "1");
        assert_eq!(encode_payment_args(&with_meta), "1500 tx-1 c7 a:1;b:2");

        // metadata is dropped without a cashier id
        let no_cashier = PaymentRequest::new(10, "tx-2").meta("a", "1");
        assert_eq!(encode_payment_args(&no_cashier), "10 tx-2");
    }
}
