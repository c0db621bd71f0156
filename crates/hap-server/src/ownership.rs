//! Ownership proof tokens for Pair-Setup.
//!
//! When required, a controller must present the most recently generated
//! token in M5. Tokens are single-use and expire.

use hap_core::HapError;
use rand::RngCore;
use std::fmt;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Token handed out of band to the controller that owns the accessory.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OwnershipProofToken(pub [u8; OwnershipProofToken::LEN]);

impl OwnershipProofToken {
    pub const LEN: usize = 16;

    fn generate() -> Self {
        let mut bytes = [0u8; Self::LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Debug for OwnershipProofToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OwnershipProofToken(..)")
    }
}

#[derive(Debug)]
pub(crate) struct SetupOwnership {
    required: bool,
    current: Option<(OwnershipProofToken, Instant)>,
    lifetime: Duration,
}

impl SetupOwnership {
    pub(crate) fn new(lifetime: Duration) -> Self {
        Self {
            required: false,
            current: None,
            lifetime,
        }
    }

    pub(crate) fn is_required(&self) -> bool {
        self.required
    }

    pub(crate) fn set_required(&mut self, required: bool) {
        self.required = required;
        self.invalidate();
    }

    pub(crate) fn generate(&mut self, now: Instant) -> Result<OwnershipProofToken, HapError> {
        if !self.required {
            return Err(HapError::InvalidState);
        }
        let token = OwnershipProofToken::generate();
        self.current = Some((token.clone(), now));
        Ok(token)
    }

    /// Check a presented token against the current one.
    pub(crate) fn is_valid(&self, presented: &[u8], now: Instant) -> bool {
        match &self.current {
            Some((token, issued)) => {
                now.duration_since(*issued) < self.lifetime
                    && bool::from(token.0.as_slice().ct_eq(presented))
            }
            None => false,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.current = None;
    }
}
