//! HKDF-SHA512 key derivation for Pair-Setup.

use hap_core::error::CryptoError;

use hkdf::Hkdf;
use sha2::Sha512;

/// Derive key using HKDF-SHA512.
///
/// # Arguments
/// * `ikm` - Input key material
/// * `salt` - Salt value (can be empty)
/// * `info` - Context/application-specific info
/// * `length` - Desired output length in bytes
pub fn derive_key(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Derive a fixed-size key.
pub fn derive_key_32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Salt and info strings used by Pair-Setup.
pub mod constants {
    pub const PAIR_SETUP_ENCRYPT_SALT: &[u8] = b"Pair-Setup-Encrypt-Salt";
    pub const PAIR_SETUP_ENCRYPT_INFO: &[u8] = b"Pair-Setup-Encrypt-Info";

    pub const CONTROLLER_SIGN_SALT: &[u8] = b"Pair-Setup-Controller-Sign-Salt";
    pub const CONTROLLER_SIGN_INFO: &[u8] = b"Pair-Setup-Controller-Sign-Info";

    pub const ACCESSORY_SIGN_SALT: &[u8] = b"Pair-Setup-Accessory-Sign-Salt";
    pub const ACCESSORY_SIGN_INFO: &[u8] = b"Pair-Setup-Accessory-Sign-Info";

    pub const MFI_PAIR_SETUP_SALT: &[u8] = b"MFi-Pair-Setup-Salt";
    pub const MFI_PAIR_SETUP_INFO: &[u8] = b"MFi-Pair-Setup-Info";

    pub const SPLIT_SETUP_SALT: &[u8] = b"SplitSetupSalt";
    pub const ACCESSORY_ENCRYPT_CONTROL_INFO: &[u8] = b"AccessoryEncrypt-Control";
    pub const CONTROLLER_ENCRYPT_CONTROL_INFO: &[u8] = b"ControllerEncrypt-Control";
}

/// Derive the key protecting the M4 to M6 sub-TLVs.
pub fn derive_pair_setup_key(session_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        session_key,
        constants::PAIR_SETUP_ENCRYPT_SALT,
        constants::PAIR_SETUP_ENCRYPT_INFO,
    )
}

/// Derive the controller signing prefix checked in M5.
pub fn derive_controller_sign_key(session_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        session_key,
        constants::CONTROLLER_SIGN_SALT,
        constants::CONTROLLER_SIGN_INFO,
    )
}

/// Derive the accessory signing prefix used in M6.
pub fn derive_accessory_sign_key(session_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        session_key,
        constants::ACCESSORY_SIGN_SALT,
        constants::ACCESSORY_SIGN_INFO,
    )
}

/// Derive the challenge signed by an authentication coprocessor in M4.
pub fn derive_mfi_challenge(session_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        session_key,
        constants::MFI_PAIR_SETUP_SALT,
        constants::MFI_PAIR_SETUP_INFO,
    )
}

/// Derive the accessory-to-controller key of a transient session.
pub fn derive_transient_accessory_key(session_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        session_key,
        constants::SPLIT_SETUP_SALT,
        constants::ACCESSORY_ENCRYPT_CONTROL_INFO,
    )
}

/// Derive the controller-to-accessory key of a transient session.
pub fn derive_transient_controller_key(session_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        session_key,
        constants::SPLIT_SETUP_SALT,
        constants::CONTROLLER_ENCRYPT_CONTROL_INFO,
    )
}
