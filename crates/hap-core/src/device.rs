//! Accessory identity and firmware version types.

use crate::error::ParseError;
use rand::RngCore;
use std::fmt;

/// Unique accessory identifier, formatted like a MAC address.
///
/// The identifier is also the pairing identifier the accessory presents to
/// controllers during Pair-Setup M6 and Pair-Verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub [u8; 6]);

impl DeviceId {
    /// Length of the textual form "XX:XX:XX:XX:XX:XX".
    pub const STRING_LEN: usize = 17;

    /// Generate a random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a MAC address from string.
    ///
    /// Supports formats:
    /// - Colon-separated: "AA:BB:CC:DD:EE:FF"
    /// - Hyphen-separated: "AA-BB-CC-DD-EE-FF"
    /// - Bare hex: "AABBCCDDEEFF"
    pub fn from_mac_string(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();

        let bytes: Vec<u8> = if let Some(sep) = [':', '-'].into_iter().find(|c| s.contains(*c)) {
            s.split(sep)
                .map(|part| {
                    if part.len() != 2 {
                        return Err(ParseError::InvalidHex(part.to_string()));
                    }
                    u8::from_str_radix(part, 16)
                        .map_err(|_| ParseError::InvalidHex(part.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            if s.len() != 12 || !s.is_ascii() {
                return Err(ParseError::InvalidFormat(format!(
                    "device ID must be 12 hex characters, got {}",
                    s.len()
                )));
            }
            (0..6)
                .map(|i| {
                    let part = &s[i * 2..i * 2 + 2];
                    u8::from_str_radix(part, 16)
                        .map_err(|_| ParseError::InvalidHex(part.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        if bytes.len() != 6 {
            return Err(ParseError::InvalidFormat(format!(
                "device ID must have 6 bytes, got {}",
                bytes.len()
            )));
        }

        let mut arr = [0u8; 6];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Convert to colon-separated string (uppercase).
    pub fn to_mac_string(&self) -> String {
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mac_string())
    }
}

/// Firmware version "major[.minor[.revision]]".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl FirmwareVersion {
    /// Size of the persisted representation.
    pub const ENCODED_LEN: usize = 12;

    pub fn new(major: u32, minor: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// Parse a version string.
    ///
    /// Between one and three dot-separated decimal numbers are accepted, each
    /// fitting in 32 bits. Missing components default to 0. Empty components,
    /// surrounding whitespace and signs are rejected.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidValue(format!("invalid version string: {:?}", s));

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse::<u32>().map_err(|_| invalid())?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    /// Encode as three little-endian u32 values.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[0..4].copy_from_slice(&self.major.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.minor.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.revision.to_le_bytes());
        bytes
    }

    /// Decode the persisted representation. Returns `None` on a length mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let read = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self::new(read(0), read(4), read(8)))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}
