//! Data types for jetbeep devices.
//!
//! This module contains the core data structures used throughout the library:
//! - Barcodes and symbologies
//! - Device identity, state flags and firmware versions
//! - Payment requests and payment errors
//! - NFC and phone-connection notifications

pub mod barcode;
pub mod device;
pub mod nfc;
pub mod payment;

pub use barcode::{Barcode, BarcodeType};
pub use device::{DeviceIdentity, DeviceInfo, DeviceState, FirmwareVersion, ReleaseTag};
pub use nfc::{MobileEvent, NfcCardType, NfcDetection, NfcDetectionError};
pub use payment::{PaymentError, PaymentMetadata, PaymentRequest};
