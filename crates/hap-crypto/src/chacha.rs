//! ChaCha20-Poly1305 AEAD for Pair-Setup sub-TLVs and secured sessions.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hap_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Largest plaintext carried by one framed block.
pub const MAX_FRAME_LEN: usize = 0x400;

/// Nonce labels used by Pair-Setup.
pub mod nonces {
    pub const PS_MSG04: &[u8] = b"PS-Msg04";
    pub const PS_MSG05: &[u8] = b"PS-Msg05";
    pub const PS_MSG06: &[u8] = b"PS-Msg06";
}

/// Secured session cipher with one key and nonce counter per direction.
///
/// Ciphers are cached for both directions so each frame avoids a key setup.
#[derive(ZeroizeOnDrop)]
pub struct ControlCipher {
    write_key: [u8; 32],
    read_key: [u8; 32],
    #[zeroize(skip)]
    write_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    read_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    encrypt_counter: u64,
    #[zeroize(skip)]
    decrypt_counter: u64,
}

impl ControlCipher {
    /// Create cipher with separate write/read keys.
    pub fn new(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        let write_cipher = ChaCha20Poly1305::new(&write_key.into());
        let read_cipher = ChaCha20Poly1305::new(&read_key.into());
        Self {
            write_key,
            read_key,
            write_cipher,
            read_cipher,
            encrypt_counter: 0,
            decrypt_counter: 0,
        }
    }

    /// Encrypt plaintext into length-prefixed frames.
    ///
    /// Each block is: [u16_le len][ciphertext][16-byte tag], with AAD=len.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::Encryption("Empty plaintext".to_string()));
        }

        let mut out =
            Vec::with_capacity(plaintext.len() + (plaintext.len() / MAX_FRAME_LEN + 1) * 18);
        for block in plaintext.chunks(MAX_FRAME_LEN) {
            let aad = (block.len() as u16).to_le_bytes();
            let nonce = build_nonce_from_counter(self.encrypt_counter);
            let payload = Payload { msg: block, aad: &aad };

            let ciphertext_with_tag = self
                .write_cipher
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;

            out.extend_from_slice(&aad);
            out.extend_from_slice(&ciphertext_with_tag);
            self.encrypt_counter += 1;
        }

        Ok(out)
    }

    /// Decrypt a single framed block.
    pub fn decrypt_block(
        &mut self,
        ciphertext_with_tag: &[u8],
        block_len: u16,
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_with_tag.len() != block_len as usize + TAG_LEN {
            return Err(CryptoError::Decryption(
                "Ciphertext block length mismatch".to_string(),
            ));
        }

        let aad = block_len.to_le_bytes();
        let nonce = build_nonce_from_counter(self.decrypt_counter);
        let payload = Payload {
            msg: ciphertext_with_tag,
            aad: &aad,
        };

        let plaintext = self
            .read_cipher
            .decrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| CryptoError::AuthTagMismatch)?;

        self.decrypt_counter += 1;
        Ok(plaintext)
    }

    /// Decrypt length-prefixed frames.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < 2 + TAG_LEN {
            return Err(CryptoError::Decryption(
                "Data too short for frame".to_string(),
            ));
        }

        let mut out = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            if offset + 2 > data.len() {
                return Err(CryptoError::Decryption(
                    "Incomplete length prefix".to_string(),
                ));
            }

            let block_len = u16::from_le_bytes([data[offset], data[offset + 1]]);
            offset += 2;

            let block_end = offset + block_len as usize + TAG_LEN;
            if block_end > data.len() {
                return Err(CryptoError::Decryption(
                    "Incomplete ciphertext block".to_string(),
                ));
            }

            out.extend_from_slice(&self.decrypt_block(&data[offset..block_end], block_len)?);
            offset = block_end;
        }

        Ok(out)
    }

    /// Get current encryption nonce counter.
    pub fn encrypt_counter(&self) -> u64 {
        self.encrypt_counter
    }

    /// Get current decryption nonce counter.
    pub fn decrypt_counter(&self) -> u64 {
        self.decrypt_counter
    }
}

/// Build 12-byte nonce from counter.
fn build_nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt with explicit 12-byte nonce.
///
/// Returns ciphertext with 16-byte auth tag appended.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))
}

/// Decrypt with explicit 12-byte nonce.
///
/// Expects ciphertext with 16-byte auth tag appended.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption(
            "Ciphertext too short (missing tag)".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Create a 12-byte nonce from a label (right-aligned, left-padded with zeros).
///
/// "PS-Msg05" becomes `\x00\x00\x00\x00PS-Msg05`.
pub fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    nonce[12 - len..].copy_from_slice(&s[..len]);
    nonce
}
