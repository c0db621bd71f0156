//! Pairing, status and feature bit fields.

use crate::error::ParseError;

/// Pairing flags exchanged in the `Flags` TLV during Pair-Setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairingFlags(pub u32);

impl PairingFlags {
    /// Pair-Setup only establishes a session; no pairing is stored.
    pub const TRANSIENT: u32 = 1 << 4;
    /// Setup info may be reused by a follow-up Pair-Setup.
    pub const SPLIT: u32 = 1 << 24;
    /// Accessory requires an ownership proof token in M5.
    pub const OWNERSHIP_PROOF_TOKEN: u32 = 1 << 30;

    /// Longest encoding accepted for the `Flags` TLV.
    pub const MAX_ENCODED_LEN: usize = 4;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }

    pub fn remove(&mut self, bits: u32) {
        self.0 &= !bits;
    }

    pub fn is_transient(&self) -> bool {
        self.contains(Self::TRANSIENT)
    }

    pub fn is_split(&self) -> bool {
        self.contains(Self::SPLIT)
    }

    /// Decode a little-endian value of up to four bytes.
    ///
    /// An empty value decodes to no flags.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() > Self::MAX_ENCODED_LEN {
            return Err(ParseError::InvalidFormat(format!(
                "flags value has {} bytes, at most {} allowed",
                bytes.len(),
                Self::MAX_ENCODED_LEN
            )));
        }
        let value = bytes
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        Ok(Self(value))
    }

    /// Encode with the minimal number of little-endian bytes.
    pub fn to_le_bytes_minimal(&self) -> Vec<u8> {
        let bytes = self.0.to_le_bytes();
        let len = 4 - (self.0.leading_zeros() as usize / 8);
        bytes[..len].to_vec()
    }
}

/// Status flags advertised while discoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    pub const NOT_PAIRED: u8 = 1 << 0;
    pub const WIFI_NOT_CONFIGURED: u8 = 1 << 1;
    pub const PROBLEM_DETECTED: u8 = 1 << 2;

    pub fn not_paired(&self) -> bool {
        self.0 & Self::NOT_PAIRED != 0
    }
}

/// Pairing feature flags advertised to controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairingFeatureFlags(pub u8);

impl PairingFeatureFlags {
    pub const SUPPORTS_AUTHENTICATION_COPROCESSOR: u8 = 1 << 0;
    pub const SUPPORTS_SOFTWARE_AUTHENTICATION: u8 = 1 << 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_encoding() {
        assert_eq!(PairingFlags(0).to_le_bytes_minimal(), Vec::<u8>::new());
        assert_eq!(PairingFlags(PairingFlags::TRANSIENT).to_le_bytes_minimal(), vec![0x10]);
        assert_eq!(
            PairingFlags(PairingFlags::SPLIT).to_le_bytes_minimal(),
            vec![0x00, 0x00, 0x00, 0x01]
        );
        assert_eq!(
            PairingFlags(PairingFlags::SPLIT | PairingFlags::TRANSIENT).to_le_bytes_minimal(),
            vec![0x10, 0x00, 0x00, 0x01]
        );
        assert_eq!(PairingFlags(0x0102).to_le_bytes_minimal(), vec![0x02, 0x01]);
    }

    #[test]
    fn decode_short_and_full_values() {
        assert_eq!(PairingFlags::from_le_bytes(&[]).unwrap(), PairingFlags(0));
        assert_eq!(PairingFlags::from_le_bytes(&[0x10]).unwrap(), PairingFlags(0x10));
        let flags = PairingFlags::from_le_bytes(&[0x10, 0x00, 0x00, 0x01]).unwrap();
        assert!(flags.is_transient());
        assert!(flags.is_split());
        assert!(PairingFlags::from_le_bytes(&[0, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn bit_manipulation() {
        let mut flags = PairingFlags::empty();
        assert!(flags.is_empty());
        flags.insert(PairingFlags::SPLIT | PairingFlags::OWNERSHIP_PROOF_TOKEN);
        assert!(flags.is_split());
        assert!(flags.contains(PairingFlags::OWNERSHIP_PROOF_TOKEN));
        flags.remove(PairingFlags::SPLIT);
        assert!(!flags.is_split());
        assert_eq!(flags.raw(), PairingFlags::OWNERSHIP_PROOF_TOKEN);
    }

    #[test]
    fn status_flags() {
        assert!(StatusFlags(StatusFlags::NOT_PAIRED).not_paired());
        assert!(!StatusFlags(StatusFlags::PROBLEM_DETECTED).not_paired());
    }
}
