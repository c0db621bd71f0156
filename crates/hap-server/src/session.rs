//! Controller sessions.
//!
//! Sessions are owned by the transport that accepted the connection and are
//! passed by reference into the server's request handlers.

use crate::transport::TransportKind;
use hap_core::{HapError, PairingError};
use hap_crypto::{ControlCipher, SessionKeys};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

/// Unique identifier of a session within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pairing methods carried in the `Method` TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingMethod {
    PairSetup = 0x00,
    PairSetupWithAuth = 0x01,
    PairVerify = 0x02,
    AddPairing = 0x03,
    RemovePairing = 0x04,
    ListPairings = 0x05,
    PairResume = 0x06,
}

impl PairingMethod {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::PairSetup),
            0x01 => Some(Self::PairSetupWithAuth),
            0x02 => Some(Self::PairVerify),
            0x03 => Some(Self::AddPairing),
            0x04 => Some(Self::RemovePairing),
            0x05 => Some(Self::ListPairings),
            0x06 => Some(Self::PairResume),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Per-session Pair-Setup progress.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PairSetupProgress {
    /// Last message number handled, 0 when idle.
    pub(crate) state: u8,
    pub(crate) method: Option<PairingMethod>,
    /// Error to report on the next read.
    pub(crate) error: Option<PairingError>,
    /// Set while this session holds the server's pairing claim.
    pub(crate) claimed: bool,
}

impl PairSetupProgress {
    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn method(&self) -> Option<PairingMethod> {
        self.method
    }

    pub fn pending_error(&self) -> Option<PairingError> {
        self.error
    }
}

/// Encrypted control channel of a session.
pub struct SecureSession {
    cipher: ControlCipher,
    is_transient: bool,
    established_at: Instant,
}

impl SecureSession {
    pub(crate) fn transient(keys: &SessionKeys, now: Instant) -> Self {
        Self {
            cipher: ControlCipher::new(keys.write_key.0, keys.read_key.0),
            is_transient: true,
            established_at: now,
        }
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }
}

impl fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("is_transient", &self.is_transient)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

/// A connection from a controller.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    transport: TransportKind,
    pub(crate) pair_setup: PairSetupProgress,
    pub(crate) secure: Option<SecureSession>,
}

impl Session {
    pub(crate) fn new(id: SessionId, transport: TransportKind) -> Self {
        Self {
            id,
            transport,
            pair_setup: PairSetupProgress::default(),
            secure: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn pair_setup(&self) -> &PairSetupProgress {
        &self.pair_setup
    }

    pub fn is_secured(&self) -> bool {
        self.secure.is_some()
    }

    pub fn is_transient(&self) -> bool {
        self.secure.as_ref().map_or(false, |s| s.is_transient)
    }

    pub fn secure_session(&self) -> Option<&SecureSession> {
        self.secure.as_ref()
    }

    /// Encrypt a response for the controller.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, HapError> {
        let secure = self.secure.as_mut().ok_or(HapError::InvalidState)?;
        secure.cipher.encrypt(plaintext).map_err(|e| {
            warn!("Session {}: encryption failed: {}", self.id, e);
            HapError::InvalidData
        })
    }

    /// Decrypt a request from the controller.
    ///
    /// A frame that fails authentication invalidates the secure session.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, HapError> {
        let secure = self.secure.as_mut().ok_or(HapError::InvalidState)?;
        match secure.cipher.decrypt(data) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                warn!("Session {}: decryption failed: {}", self.id, e);
                self.secure = None;
                Err(HapError::NotAuthorized)
            }
        }
    }

    /// Whether the secure session outlived the configured key expiry.
    pub fn is_secure_session_expired(&self, now: Instant, expiry: Option<Duration>) -> bool {
        match (&self.secure, expiry) {
            (Some(secure), Some(expiry)) => now.duration_since(secure.established_at) >= expiry,
            _ => false,
        }
    }

    /// Drop the secure channel.
    pub fn invalidate(&mut self) {
        self.secure = None;
    }
}
