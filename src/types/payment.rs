//! Payment request and result types.

use std::collections::BTreeMap;

/// Free-form key/value pairs attached to a payment.
///
/// Keys and values must not contain `:`, `;` or spaces: the wire format has
/// no escaping, so such pairs cannot be read back by the device.
pub type PaymentMetadata = BTreeMap<String, String>;

/// Reason code carried by a `PAYMENT_ERROR` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentError {
    Network,
    Timeout,
    Server,
    Security,
    Withdrawal,
    Discarded,
    InvalidPin,
    Unknown,
}

impl PaymentError {
    /// Parses a wire code. Returns `None` for codes the device never sends.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "NETWORK" => Some(Self::Network),
            "TIMEOUT" => Some(Self::Timeout),
            "SERVER" => Some(Self::Server),
            "SECURITY" => Some(Self::Security),
            "WITHDRAWAL" => Some(Self::Withdrawal),
            "DISCARDED" => Some(Self::Discarded),
            "INVALID_PIN" => Some(Self::InvalidPin),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Timeout => "TIMEOUT",
            Self::Server => "SERVER",
            Self::Security => "SECURITY",
            Self::Withdrawal => "WITHDRAWAL",
            Self::Discarded => "DISCARDED",
            Self::InvalidPin => "INVALID_PIN",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Arguments of `CREATE_PAYMENT` and `CREATE_PAYMENT_TOKEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Amount in minor currency units.
    pub amount: u32,
    /// Merchant-side transaction id.
    pub transaction_id: String,
    /// Optional cashier id.
    pub cashier_id: Option<String>,
    /// Metadata. Only sent when a cashier id is present.
    pub metadata: PaymentMetadata,
}

impl PaymentRequest {
    /// Creates a request without cashier id or metadata.
    #[must_use]
    pub fn new(amount: u32, transaction_id: impl Into<String>) -> Self {
        Self {
            amount,
            transaction_id: transaction_id.into(),
            cashier_id: None,
            metadata: PaymentMetadata::new(),
        }
    }

    /// Sets the cashier id.
    #[must_use]
    pub fn cashier(mut self, cashier_id: impl Into<String>) -> Self {
        self.cashier_id = Some(cashier_id.into());
        self
    }

    /// Adds a metadata pair.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_error_codes() {
        assert_eq!(PaymentError::from_code("INVALID_PIN"), Some(PaymentError::InvalidPin));
        assert_eq!(PaymentError::from_code("UNKNOWN"), Some(PaymentError::Unknown));
        assert_eq!(PaymentError::from_code("network"), None);
        assert_eq!(PaymentError::Withdrawal.code(), "WITHDRAWAL");
    }

    #[test]
    fn test_payment_request_builder() {
        let request = PaymentRequest::new(1500, "tx-1").cashier("c7").meta("a", "1");
        assert_eq!(request.cashier_id.as_deref(), Some("c7"));
        assert_eq!(request.metadata.get("a").map(String::as_str), Some("1"));
    }
}
