//! Ed25519 signatures for long-term identities.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hap_core::error::CryptoError;
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

/// Long-term Ed25519 identity key pair.
///
/// The accessory persists only the 32-byte seed (its LTSK) and derives the
/// public key (LTPK) on load.
#[derive(Clone, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_seed(&signing_key.to_bytes())
    }

    /// Create from seed bytes (32 bytes).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public = signing_key.verifying_key().to_bytes();
        Self {
            public,
            secret: *seed,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Sign a message, returning 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.secret).sign(message).to_bytes()
    }

    /// Export the seed for storage (32 bytes).
    pub fn seed(&self) -> [u8; 32] {
        self.secret
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature.
pub fn verify(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::KeyDerivation(format!("Invalid public key: {}", e)))?;

    verifying_key
        .verify(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::SignatureInvalid)
}
