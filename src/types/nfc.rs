//! NFC detection notifications.
//!
//! Only detection is covered; block I/O on detected cards is not.

/// Card family reported by `NFC_DETECTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NfcCardType {
    Unknown = 0,
    EmvCard = 1,
    MifareClassic1k = 2,
    MifareClassic4k = 3,
    MifarePlus2k = 4,
    MifarePlus4k = 5,
    MifareDesfire2k = 6,
    MifareDesfire4k = 7,
    MifareDesfire8k = 8,
}

impl NfcCardType {
    /// Maps the numeric wire code, falling back to `Unknown`.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::EmvCard,
            2 => Self::MifareClassic1k,
            3 => Self::MifareClassic4k,
            4 => Self::MifarePlus2k,
            5 => Self::MifarePlus4k,
            6 => Self::MifareDesfire2k,
            7 => Self::MifareDesfire4k,
            8 => Self::MifareDesfire8k,
            _ => Self::Unknown,
        }
    }
}

/// Card detected in the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfcDetection {
    pub card_type: NfcCardType,
    /// Remaining event tokens, space-joined.
    pub meta: String,
}

/// Reason carried by `NFC_DETECTION_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NfcDetectionError {
    Unknown,
    MultipleCards,
    Unsupported,
}

impl NfcDetectionError {
    /// Parses a wire code, falling back to `Unknown`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "MULTIPLE_CARDS" => Self::MultipleCards,
            "UNSUPPORTED" => Self::Unsupported,
            _ => Self::Unknown,
        }
    }
}

/// Phone connection change reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobileEvent {
    Connected,
    Disconnected,
}
