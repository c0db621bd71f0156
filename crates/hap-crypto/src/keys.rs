//! Session key types and derivation.

use crate::hkdf;
use hap_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32-byte encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

/// Complete set of session keys derived from a shared secret.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for encrypting data we send.
    pub write_key: EncryptionKey,
    /// Key for decrypting data we receive.
    pub read_key: EncryptionKey,
}

impl EncryptionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl SessionKeys {
    /// Derive the accessory's keys for a transient Pair-Setup session.
    ///
    /// The accessory writes with the accessory-to-controller key and reads
    /// with the controller-to-accessory key.
    pub fn derive_transient_accessory_keys(session_key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            write_key: EncryptionKey(hkdf::derive_transient_accessory_key(session_key)?),
            read_key: EncryptionKey(hkdf::derive_transient_controller_key(session_key)?),
        })
    }

    /// Derive the controller's view of the same transient session.
    pub fn derive_transient_controller_keys(session_key: &[u8]) -> Result<Self, CryptoError> {
        let accessory = Self::derive_transient_accessory_keys(session_key)?;
        Ok(Self {
            write_key: accessory.read_key.clone(),
            read_key: accessory.write_key.clone(),
        })
    }
}
