//! Device identity and status types.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One physical attachment of a device.
///
/// Two identities are equal iff vendor id, product id and OS path all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// OS path of the serial device (e.g. "/dev/ttyACM0" or "COM3").
    pub path: String,
}

impl DeviceIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(vendor_id: u16, product_id: u16, path: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            path: path.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}@{}",
            self.vendor_id, self.product_id, self.path
        )
    }
}

/// Flags reported by the `GETSTATE` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceState {
    pub session_opened: bool,
    pub barcodes_requested: bool,
    pub payment_created: bool,
    pub waiting_for_payment_confirmation: bool,
    pub refund_requested: bool,
}

/// Information gathered from the device during the attach handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Firmware version string as reported by `GET version`.
    pub version: String,
    /// Device id reported by `GET deviceId` (hexadecimal on the wire).
    pub device_id: u64,
}

/// Pre-release tag of a firmware version, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReleaseTag {
    Alpha,
    Beta,
    Rc,
    Release,
}

/// A parsed firmware version: `major.minor.patch[-tag]`.
///
/// Unknown tags rank as releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub tag: ReleaseTag,
}

impl FirmwareVersion {
    fn key(self) -> (u8, u8, u8, ReleaseTag) {
        (self.major, self.minor, self.patch, self.tag)
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::protocol(format!("invalid firmware version: {s:?}"));

        let (numbers, tag) = match s.split_once('-') {
            Some((numbers, tag)) => (numbers, Some(tag)),
            None => (s, None),
        };

        let mut parts = numbers.split('.').map(str::parse::<u8>);
        let (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let tag = match tag.map(str::to_ascii_lowercase).as_deref() {
            Some("alpha") => ReleaseTag::Alpha,
            Some("beta") => ReleaseTag::Beta,
            Some("rc") => ReleaseTag::Rc,
            _ => ReleaseTag::Release,
        };

        Ok(Self {
            major,
            minor,
            patch,
            tag,
        })
    }
}
