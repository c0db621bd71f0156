//! TLV8 encoding/decoding for HomeKit pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across multiple TLVs.

use hap_core::error::{PairingError, ParseError};

/// TLV type constants for HomeKit pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    SessionId = 0x0E,
    Flags = 0x13,
    OwnershipProofToken = 0x1A,
    ProductData = 0x1C,
    Separator = 0xFF,
}

/// TLV8 message.
///
/// Items keep the order in which they were set or parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    ///
    /// Consecutive TLVs with the same type are concatenated into one value.
    /// A type that reappears after a different type is rejected.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut i = 0;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(ParseError::InvalidFormat(
                    "TLV8: truncated header".to_string(),
                ));
            }

            let typ = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8: truncated value (expected {} bytes, got {})",
                    len,
                    data.len() - i
                )));
            }

            let value = &data[i..i + len];
            i += len;

            match items.last_mut() {
                Some((last, existing)) if *last == typ => existing.extend_from_slice(value),
                _ => {
                    if items.iter().any(|(t, _)| *t == typ) {
                        return Err(ParseError::InvalidFormat(format!(
                            "TLV8: duplicate type 0x{:02x}",
                            typ
                        )));
                    }
                    items.push((typ, value.to_vec()));
                }
            }
        }

        Ok(Self { items })
    }

    /// Encode to bytes.
    ///
    /// Values > 255 bytes are automatically fragmented across multiple TLVs.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::new();

        for (typ, value) in &self.items {
            if value.is_empty() {
                result.push(*typ);
                result.push(0);
            } else {
                for chunk in value.chunks(255) {
                    result.push(*typ);
                    result.push(chunk.len() as u8);
                    result.extend_from_slice(chunk);
                }
            }
        }

        result
    }

    /// Get value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// Get value for raw type.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ)
            .map(|(_, v)| v.as_slice())
    }

    /// Set value for type, replacing any previous value.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.set_raw(typ as u8, value);
    }

    /// Set value for raw type, replacing any previous value.
    pub fn set_raw(&mut self, typ: u8, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.items.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => *existing = value,
            None => self.items.push((typ, value)),
        }
    }

    /// Check if type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Get retry delay value in seconds.
    /// The value is little-endian encoded (1-2 bytes).
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvType::RetryDelay).map(|v| match v.len() {
            0 => 0,
            1 => v[0] as u16,
            _ => u16::from_le_bytes([v[0], v[1]]),
        })
    }

    /// Get error description string.
    pub fn error_description(&self) -> Option<String> {
        let code = self.error()?;
        let mut desc = match PairingError::from_byte(code) {
            Some(err) => format!("Error 0x{:02x}: {}", code, err),
            None => format!("Error 0x{:02x}: Unknown error code", code),
        };

        if let Some(delay) = self.retry_delay() {
            if delay > 0 {
                desc.push_str(&format!(" (retry after {} seconds)", delay));
            }
        }

        Some(desc)
    }

    /// Create a `{State, Error}` response.
    pub fn error_response(state: u8, error: PairingError) -> Self {
        let mut tlv = Self::new();
        tlv.set(TlvType::State, vec![state]);
        tlv.set(TlvType::Error, vec![error.as_byte()]);
        tlv
    }

    /// Create M1 pair-setup request.
    pub fn pair_setup_m1(method: u8) -> Self {
        let mut tlv = Self::new();
        tlv.set(TlvType::State, vec![0x01]);
        tlv.set(TlvType::Method, vec![method]);
        tlv
    }

    /// Create M1 pair-setup request carrying pairing flags.
    pub fn pair_setup_m1_with_flags(method: u8, flags: &[u8]) -> Self {
        let mut tlv = Self::pair_setup_m1(method);
        tlv.set(TlvType::Flags, flags.to_vec());
        tlv
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x0E => Some(Self::SessionId),
            0x13 => Some(Self::Flags),
            0x1A => Some(Self::OwnershipProofToken),
            0x1C => Some(Self::ProductData),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parsing {
        use super::*;

        #[test]
        fn parse_empty() {
            let tlv = Tlv8::parse(&[]).unwrap();
            assert!(tlv.is_empty());
            assert!(!tlv.contains(TlvType::State));
        }

        #[test]
        fn parse_multiple_tlvs() {
            let data = [
                0x06, 0x01, 0x01, // State=1
                0x00, 0x01, 0x00, // Method=0
            ];
            let tlv = Tlv8::parse(&data).unwrap();
            assert_eq!(tlv.state(), Some(0x01));
            assert_eq!(tlv.get(TlvType::Method), Some([0x00].as_slice()));
        }

        #[test]
        fn parse_zero_length_value() {
            let tlv = Tlv8::parse(&[0x13, 0x00]).unwrap();
            assert_eq!(tlv.get(TlvType::Flags), Some([].as_slice()));
        }

        #[test]
        fn parse_fragmented_value() {
            let mut data = vec![0x03, 0xFF];
            data.extend(vec![0xAA; 255]);
            data.extend([0x03, 0x2D]);
            data.extend(vec![0xBB; 45]);

            let tlv = Tlv8::parse(&data).unwrap();
            let pk = tlv.get(TlvType::PublicKey).unwrap();
            assert_eq!(pk.len(), 300);
            assert!(pk[..255].iter().all(|&b| b == 0xAA));
            assert!(pk[255..].iter().all(|&b| b == 0xBB));
        }

        #[test]
        fn parse_rejects_separated_duplicates() {
            let data = [0x06, 0x01, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03];
            assert!(Tlv8::parse(&data).is_err());
        }

        #[test]
        fn parse_error_on_truncation() {
            assert!(Tlv8::parse(&[0x06]).is_err());
            assert!(Tlv8::parse(&[0x06, 0x05, 0x01, 0x02]).is_err());
        }
    }

    mod encoding {
        use super::*;

        #[test]
        fn encode_keeps_insertion_order() {
            let mut tlv = Tlv8::new();
            tlv.set(TlvType::State, vec![0x02]);
            tlv.set(TlvType::Salt, vec![0x11; 2]);
            assert_eq!(tlv.encode(), vec![0x06, 0x01, 0x02, 0x02, 0x02, 0x11, 0x11]);
        }

        #[test]
        fn set_replaces_in_place() {
            let mut tlv = Tlv8::new();
            tlv.set(TlvType::State, vec![0x01]);
            tlv.set(TlvType::Method, vec![0x00]);
            tlv.set(TlvType::State, vec![0x03]);
            assert_eq!(tlv.encode(), vec![0x06, 0x01, 0x03, 0x00, 0x01, 0x00]);
        }

        #[test]
        fn encode_fragments_long_values() {
            let mut tlv = Tlv8::new();
            let long_value: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
            tlv.set(TlvType::PublicKey, long_value.clone());

            let encoded = tlv.encode();
            assert_eq!(encoded[0], 0x03);
            assert_eq!(encoded[1], 255);
            assert_eq!(&encoded[2..257], &long_value[..255]);
            assert_eq!(encoded[257], 0x03);
            assert_eq!(encoded[258], 45);
            assert_eq!(&encoded[259..], &long_value[255..]);

            assert_eq!(Tlv8::parse(&encoded).unwrap(), tlv);
        }

        #[test]
        fn encode_exact_multiple_of_255() {
            let mut tlv = Tlv8::new();
            tlv.set(TlvType::EncryptedData, vec![0x5A; 510]);
            let encoded = tlv.encode();
            assert_eq!(encoded.len(), 514);
            assert_eq!(Tlv8::parse(&encoded).unwrap(), tlv);
        }
    }

    mod accessors {
        use super::*;

        #[test]
        fn state_and_error() {
            let tlv = Tlv8::error_response(0x04, PairingError::Authentication);
            assert_eq!(tlv.state(), Some(0x04));
            assert_eq!(tlv.error(), Some(0x02));
            assert_eq!(tlv.encode(), vec![0x06, 0x01, 0x04, 0x07, 0x01, 0x02]);
        }

        #[test]
        fn error_description_with_retry_delay() {
            let mut tlv = Tlv8::error_response(0x02, PairingError::Backoff);
            tlv.set(TlvType::RetryDelay, vec![0x3C]);
            let desc = tlv.error_description().unwrap();
            assert!(desc.contains("0x03"));
            assert!(desc.contains("retry after 60 seconds"));
        }

        #[test]
        fn m1_builders() {
            let tlv = Tlv8::pair_setup_m1(0x00);
            assert_eq!(tlv.state(), Some(0x01));
            assert_eq!(tlv.get(TlvType::Method), Some([0x00].as_slice()));

            let tlv = Tlv8::pair_setup_m1_with_flags(0x00, &[0x10]);
            assert_eq!(tlv.get(TlvType::Flags), Some([0x10].as_slice()));
        }
    }

    mod tlv_type {
        use super::*;

        #[test]
        fn from_byte_known_types() {
            assert_eq!(TlvType::from_byte(0x00), Some(TlvType::Method));
            assert_eq!(TlvType::from_byte(0x05), Some(TlvType::EncryptedData));
            assert_eq!(TlvType::from_byte(0x13), Some(TlvType::Flags));
            assert_eq!(TlvType::from_byte(0x1A), Some(TlvType::OwnershipProofToken));
            assert_eq!(TlvType::from_byte(0x1C), Some(TlvType::ProductData));
            assert_eq!(TlvType::from_byte(0xFF), Some(TlvType::Separator));
        }

        #[test]
        fn from_byte_unknown_returns_none() {
            assert_eq!(TlvType::from_byte(0x10), None);
            assert_eq!(TlvType::from_byte(0xFE), None);
        }
    }
}
