//! Barcode types.

/// Symbology reported by the device for a scanned barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BarcodeType {
    Unknown = 0,
    UpcA = 1,
    UpcE = 2,
    EanJan8 = 3,
    EanJan13 = 4,
    Tf = 5,
    Itf = 6,
    Codabar = 7,
    Code39 = 8,
    Code93 = 9,
    Code128 = 10,
    UpcAS = 11,
    UpcES = 12,
    UpcD1 = 13,
    UpcD2 = 14,
    UpcD3 = 15,
    UpcD4 = 16,
    UpcD5 = 17,
    Ean8S = 18,
    Ean13S = 19,
    Ean128 = 20,
    OcrA = 21,
    OcrB = 22,
    Code128Parsed = 23,
    Gs1DataBar = 24,
    Rss14 = 25,
    Gs1DataBarExpanded = 26,
    RssExpanded = 27,
    Gs1DataBarStackedOmnidirectional = 28,
    Gs1DataBarExpandedStacked = 29,
    Cca = 30,
    Ccb = 31,
    Ccc = 32,
    Pdf417 = 33,
    Maxicode = 34,
    DataMatrix = 35,
    QrCode = 36,
    MicroQrCode = 37,
    Aztec = 38,
    MicroPdf417 = 39,
    Other = 40,
}

impl BarcodeType {
    const ALL: [Self; 41] = [
        Self::Unknown,
        Self::UpcA,
        Self::UpcE,
        Self::EanJan8,
        Self::EanJan13,
        Self::Tf,
        Self::Itf,
        Self::Codabar,
        Self::Code39,
        Self::Code93,
        Self::Code128,
        Self::UpcAS,
        Self::UpcES,
        Self::UpcD1,
        Self::UpcD2,
        Self::UpcD3,
        Self::UpcD4,
        Self::UpcD5,
        Self::Ean8S,
        Self::Ean13S,
        Self::Ean128,
        Self::OcrA,
        Self::OcrB,
        Self::Code128Parsed,
        Self::Gs1DataBar,
        Self::Rss14,
        Self::Gs1DataBarExpanded,
        Self::RssExpanded,
        Self::Gs1DataBarStackedOmnidirectional,
        Self::Gs1DataBarExpandedStacked,
        Self::Cca,
        Self::Ccb,
        Self::Ccc,
        Self::Pdf417,
        Self::Maxicode,
        Self::DataMatrix,
        Self::QrCode,
        Self::MicroQrCode,
        Self::Aztec,
        Self::MicroPdf417,
        Self::Other,
    ];

    /// Maps the numeric code used on the wire.
    ///
    /// Codes outside the known table map to [`BarcodeType::Unknown`].
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .unwrap_or(Self::Unknown)
    }

    /// Returns the numeric wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// A scanned barcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    /// Decoded barcode content.
    pub value: String,
    /// Symbology.
    pub kind: BarcodeType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barcode_type_codes() {
        assert_eq!(BarcodeType::from_code(4), BarcodeType::EanJan13);
        assert_eq!(BarcodeType::from_code(1), BarcodeType::UpcA);
        assert_eq!(BarcodeType::from_code(40), BarcodeType::Other);
        assert_eq!(BarcodeType::from_code(41), BarcodeType::Unknown);
        assert_eq!(BarcodeType::QrCode.code(), 36);
    }

    #[test]
    fn test_table_matches_discriminants() {
        for (i, kind) in BarcodeType::ALL.iter().enumerate() {
            assert_eq!(usize::from(kind.code()), i);
        }
    }
}
