//! # hap-crypto
//!
//! Cryptographic primitives for HomeKit Pair-Setup and secured sessions.
//!
//! This crate provides:
//! - SRP-6a (3072-bit) accessory primitives and a controller client
//! - Ed25519 for long-term identities
//! - ChaCha20-Poly1305 for AEAD encryption
//! - HKDF-SHA512 for key derivation
//! - TLV8 message encoding
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::ControlCipher;
pub use ed25519::IdentityKeyPair;
pub use keys::{EncryptionKey, SessionKeys};
pub use tlv::{Tlv8, TlvType};
