//! Error types for the accessory server.

use thiserror::Error;

/// Primary error type for all accessory server operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HAP error: {0}")]
    Hap(#[from] HapError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status codes returned to transports by the server core.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapError {
    #[error("Unknown error")]
    Unknown,

    #[error("Operation is not supported in the current state")]
    InvalidState,

    #[error("Invalid data")]
    InvalidData,

    #[error("Out of resources")]
    OutOfResources,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Busy")]
    Busy,
}

/// Pairing error codes carried in the `Error` TLV.
///
/// These are delivered to the controller on the next read of a pairing
/// endpoint rather than returned as transport errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingError {
    #[error("Generic error")]
    Unknown = 0x01,

    #[error("Setup code or signature verification failed")]
    Authentication = 0x02,

    #[error("Client must wait before retrying")]
    Backoff = 0x03,

    #[error("Server cannot accept any more pairings")]
    MaxPeers = 0x04,

    #[error("Server reached its maximum number of authentication attempts")]
    MaxTries = 0x05,

    #[error("Server pairing method is unavailable")]
    Unavailable = 0x06,

    #[error("Server is busy with another pairing")]
    Busy = 0x07,

    #[error("Ownership proof token was missing or invalid")]
    OwnershipFailure = 0x08,
}

impl PairingError {
    /// Decode a wire error code.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Unknown),
            0x02 => Some(Self::Authentication),
            0x03 => Some(Self::Backoff),
            0x04 => Some(Self::MaxPeers),
            0x05 => Some(Self::MaxTries),
            0x06 => Some(Self::Unavailable),
            0x07 => Some(Self::Busy),
            0x08 => Some(Self::OwnershipFailure),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Illegal SRP public key")]
    IllegalPublicKey,

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,

    #[error("Signature verification failed")]
    SignatureInvalid,
}

/// Parsing errors for various formats.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Errors reported by key-value store backends.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Store I/O failed: {0}")]
    Io(String),

    #[error("Corrupted entry {domain:#04x}/{key:#04x}: {reason}")]
    Corrupted {
        domain: u8,
        key: u8,
        reason: String,
    },

    #[error("Store serialization failed: {0}")]
    Serialization(String),
}

impl From<ParseError> for HapError {
    fn from(_: ParseError) -> Self {
        HapError::InvalidData
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let hap_err = Error::Hap(HapError::InvalidState);
        assert!(hap_err.to_string().contains("HAP error"));
        assert!(hap_err.to_string().contains("current state"));

        let pairing_err = Error::Pairing(PairingError::MaxTries);
        assert!(pairing_err.to_string().contains("Pairing error"));
        assert!(pairing_err.to_string().contains("authentication attempts"));

        let storage_err = StorageError::Corrupted {
            domain: 0x90,
            key: 0x21,
            reason: "bad length".to_string(),
        };
        assert_eq!(
            storage_err.to_string(),
            "Corrupted entry 0x90/0x21: bad length"
        );
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error as StdError;

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err = Error::Io(io_err);
        assert!(err.source().is_some());

        let err = Error::Storage(StorageError::Io("disk full".to_string()));
        assert!(err.source().is_some());
    }

    #[test]
    fn error_conversions() {
        let err: Error = HapError::Busy.into();
        assert!(matches!(err, Error::Hap(HapError::Busy)));

        let err: Error = PairingError::Unavailable.into();
        assert!(matches!(err, Error::Pairing(_)));

        let err: Error = CryptoError::AuthTagMismatch.into();
        assert!(matches!(err, Error::Crypto(_)));

        let err: Error = ParseError::InvalidHex("zz".to_string()).into();
        assert!(matches!(err, Error::Parse(_)));

        let err: Error = StorageError::Serialization("eof".to_string()).into();
        assert!(matches!(err, Error::Storage(_)));

        let hap: HapError = ParseError::MissingField("state").into();
        assert_eq!(hap, HapError::InvalidData);
    }

    #[test]
    fn pairing_error_wire_codes() {
        for code in 1u8..=8 {
            let err = PairingError::from_byte(code).unwrap();
            assert_eq!(err.as_byte(), code);
        }
        assert_eq!(PairingError::from_byte(0), None);
        assert_eq!(PairingError::from_byte(9), None);
        assert_eq!(PairingError::Busy.as_byte(), 0x07);
    }
}
