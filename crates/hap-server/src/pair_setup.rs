//! Pair-Setup.
//!
//! A controller that knows the setup code establishes a pairing in six
//! messages. Odd messages arrive as writes, even messages are produced by
//! the following read:
//!
//! | Msg | Contents |
//! |-----|----------|
//! | M1  | method, optional flags |
//! | M2  | salt, SRP public key B, echoed flags |
//! | M3  | SRP public key A, proof M1 |
//! | M4  | proof M2, optional MFi signature and product data |
//! | M5  | controller identifier, LTPK and signature |
//! | M6  | accessory identifier, LTPK and signature |
//!
//! Only one session may run the procedure at a time. It claims the server
//! on its first write and keeps the claim until the procedure completes,
//! fails, or is taken over after the procedure timeout.

use crate::delegate::ServerEvent;
use crate::ownership::OwnershipProofToken;
use crate::pairing::{self, Pairing, MAX_IDENTIFIER_LEN, PERMISSION_ADMIN};
use crate::server::AccessoryServer;
use crate::session::{PairingMethod, SecureSession, Session, SessionId};
use crate::store::{domain, key, StoreExt};
use hap_core::{Error, HapError, PairingError, PairingFlags};
use hap_crypto::chacha::{self, nonces};
use hap_crypto::{ed25519, hkdf, srp, SessionKeys, Tlv8, TlvType};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use zeroize::{Zeroize, Zeroizing};

/// Failed setup code attempts after which pairing is refused.
pub const MAX_AUTH_ATTEMPTS: u8 = 100;

/// Working set of the procedure in progress.
#[derive(Default)]
pub(crate) struct PairSetupScratch {
    /// Session holding the claim.
    pub(crate) claim: Option<SessionId>,
    pub(crate) started_at: Option<Instant>,
    /// Flags from M1, `None` when the TLV was absent.
    flags: Option<PairingFlags>,
    /// Whether the setup info survives the next reset.
    pub(crate) keep_setup_info: bool,
    b: Vec<u8>,
    public_b: Vec<u8>,
    public_a: Vec<u8>,
    controller_proof: Vec<u8>,
    accessory_proof: Vec<u8>,
    k: Vec<u8>,
    session_key: [u8; 32],
}

impl Drop for PairSetupScratch {
    fn drop(&mut self) {
        self.b.zeroize();
        self.public_b.zeroize();
        self.public_a.zeroize();
        self.controller_proof.zeroize();
        self.accessory_proof.zeroize();
        self.k.zeroize();
        self.session_key.zeroize();
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut padded = vec![0u8; len];
    padded[len - bytes.len()..].copy_from_slice(bytes);
    padded
}

fn expect_state(tlv: &Tlv8, step: &str, expected: u8) -> Result<(), HapError> {
    match tlv.get(TlvType::State) {
        Some([state]) if *state == expected => Ok(()),
        Some([state]) => {
            warn!("Pair Setup {}: kTLVType_State invalid: {}.", step, state);
            Err(HapError::InvalidData)
        }
        Some(value) => {
            warn!(
                "Pair Setup {}: kTLVType_State has invalid length ({}).",
                step,
                value.len()
            );
            Err(HapError::InvalidData)
        }
        None => {
            warn!("Pair Setup {}: kTLVType_State missing.", step);
            Err(HapError::InvalidData)
        }
    }
}

fn crypto_failure(context: &str, err: impl std::fmt::Display) -> HapError {
    error!("Pair Setup {}: {}", context, err);
    HapError::Unknown
}

impl AccessoryServer {
    /// Drop the Pair-Setup state of `session` and release its claim.
    pub(crate) fn reset_pair_setup_for_session(&mut self, session: &mut Session) {
        if self.pair_setup.claim == Some(session.id()) {
            self.release_pair_setup_claim();
        }
        session.pair_setup = Default::default();
    }

    /// Release the claim of whichever session holds it.
    pub(crate) fn release_pair_setup_claim(&mut self) {
        if self.pair_setup.claim.is_none() {
            return;
        }
        let keep = self.pair_setup.keep_setup_info;
        self.pair_setup = PairSetupScratch::default();
        self.setup_info_handle_pairing_stop(keep);
    }

    /// A session whose claim was taken over starts from scratch.
    fn forget_stale_claim(&self, session: &mut Session) {
        if session.pair_setup.claimed && self.pair_setup.claim != Some(session.id()) {
            debug!("Session {}: Pair Setup procedure was taken over.", session.id());
            session.pair_setup = Default::default();
        }
    }

    fn restart_with_kept_setup_info(&mut self, session: Option<&mut Session>) {
        self.pair_setup.keep_setup_info = true;
        match session {
            Some(session) => self.reset_pair_setup_for_session(session),
            None => self.release_pair_setup_claim(),
        }
        self.setup_info_forget_kept();
    }

    /// Handle a write to the Pair-Setup endpoint.
    pub fn handle_pair_setup_write(
        &mut self,
        session: &mut Session,
        request: &[u8],
    ) -> Result<(), HapError> {
        self.forget_stale_claim(session);

        let tlv = match Tlv8::parse(request) {
            Ok(tlv) => tlv,
            Err(e) => {
                warn!("Pair Setup: malformed request: {}", e);
                self.reset_pair_setup_for_session(session);
                return Err(HapError::InvalidData);
            }
        };

        if self.pair_setup.claim == Some(session.id()) && tlv.get(TlvType::State) == Some(&[1][..]) {
            warn!("Received Pair Setup M1 during ongoing Pair Setup procedure. Aborting previous procedure.");
            self.restart_with_kept_setup_info(Some(session));
        }

        if session.pair_setup.state == 0 && !self.is_paired() {
            let now = self.clock.now();
            if let Some(owner) = self.pair_setup.claim {
                if owner != session.id() {
                    let started = self.pair_setup.started_at.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(started);
                    if elapsed >= self.options.pair_setup_timeout {
                        info!(
                            "Pair Setup: Resetting Pair Setup procedure after {} seconds.",
                            elapsed.as_secs()
                        );
                        self.restart_with_kept_setup_info(None);
                    }
                }
            }
            if self.pair_setup.claim.is_none() {
                self.pair_setup.claim = Some(session.id());
                self.pair_setup.started_at = Some(now);
                session.pair_setup.claimed = true;
                self.setup_info_handle_pairing_start();
            }
        }

        let result = match session.pair_setup.state {
            0 => {
                session.pair_setup.state = 1;
                self.process_m1(session, &tlv)
            }
            2 => {
                session.pair_setup.state = 3;
                self.process_m3(&tlv)
            }
            4 => {
                session.pair_setup.state = 5;
                self.process_m5(session, &tlv)
            }
            state => {
                warn!("Received unexpected Pair Setup write in state M{}.", state);
                Err(HapError::InvalidState)
            }
        };
        if result.is_err() {
            self.reset_pair_setup_for_session(session);
        }
        result
    }

    /// Produce the response to a read of the Pair-Setup endpoint.
    pub fn handle_pair_setup_read(&mut self, session: &mut Session) -> Result<Vec<u8>, HapError> {
        self.forget_stale_claim(session);

        if let Some(err) = session.pair_setup.error {
            let response = Tlv8::error_response(session.pair_setup.state.wrapping_add(1), err);
            self.reset_pair_setup_for_session(session);
            return Ok(response.encode());
        }

        let result = match session.pair_setup.state {
            1 => {
                session.pair_setup.state = 2;
                self.get_m2(session)
            }
            3 => {
                session.pair_setup.state = 4;
                self.get_m4(session)
            }
            5 => {
                session.pair_setup.state = 6;
                self.get_m6(session)
            }
            state => {
                warn!("Received unexpected Pair Setup read in state M{}.", state);
                Err(HapError::InvalidState)
            }
        };

        match result {
            Err(e) => {
                self.reset_pair_setup_for_session(session);
                Err(e)
            }
            Ok(response) => match session.pair_setup.error {
                Some(err) => {
                    let response = Tlv8::error_response(session.pair_setup.state, err);
                    self.reset_pair_setup_for_session(session);
                    Ok(response.encode())
                }
                None => Ok(response.encode()),
            },
        }
    }

    fn process_m1(&mut self, session: &mut Session, tlv: &Tlv8) -> Result<(), HapError> {
        debug!("Pair Setup M1: SRP Start Request.");
        expect_state(tlv, "M1", 1)?;

        let method = match tlv.get(TlvType::Method) {
            Some([m]) if *m == PairingMethod::PairSetup.as_byte()
                || *m == PairingMethod::PairSetupWithAuth.as_byte() =>
            {
                PairingMethod::from_byte(*m).ok_or(HapError::InvalidData)?
            }
            Some(value) => {
                warn!("Pair Setup M1: kTLVType_Method invalid: {:02x?}.", value);
                return Err(HapError::InvalidData);
            }
            None => {
                warn!("Pair Setup M1: kTLVType_Method missing.");
                return Err(HapError::InvalidData);
            }
        };
        debug!("Pair Setup M1: kTLVType_Method = {}.", method.as_byte());
        session.pair_setup.method = Some(method);

        let flags = match tlv.get(TlvType::Flags) {
            Some(value) if value.len() > PairingFlags::MAX_ENCODED_LEN => {
                warn!(
                    "Pair Setup M1: kTLVType_Flags has invalid length ({}).",
                    value.len()
                );
                return Err(HapError::InvalidData);
            }
            Some(value) => Some(PairingFlags::from_le_bytes(value)?),
            None => None,
        };
        if self.pair_setup.claim == Some(session.id()) {
            self.pair_setup.flags = flags;
        }

        let hw_auth = self.mfi.as_ref().map_or(false, |m| m.is_available());
        let token_auth = self.mfi.as_ref().map_or(false, |m| m.supports_token_auth());
        if hw_auth {
            if method != PairingMethod::PairSetupWithAuth {
                info!(
                    "Pair Setup M1: Accessory supports Apple Authentication Coprocessor but controller requested kTLVType_Method {}.",
                    method.as_byte()
                );
            }
        } else if token_auth {
            if method != PairingMethod::PairSetup {
                info!(
                    "Pair Setup M1: Accessory supports Software Authentication but controller requested kTLVType_Method {}.",
                    method.as_byte()
                );
            } else if flags.is_none() {
                info!("Pair Setup M1: Accessory supports Software Authentication but controller did not provide kTLVType_Flags.");
            }
        } else if method != PairingMethod::PairSetup {
            info!(
                "Pair Setup M1: Accessory does not support MFi authentication but controller requested kTLVType_Method {}.",
                method.as_byte()
            );
        }
        Ok(())
    }

    fn unsuccessful_auth_attempts(&self) -> Result<u8, HapError> {
        let stored = self
            .store
            .get(domain::CONFIGURATION, key::UNSUCCESSFUL_AUTH_ATTEMPTS)
            .map_err(|e| {
                error!("Unable to read authentication attempts counter: {}", e);
                HapError::Unknown
            })?;
        match stored.as_deref() {
            None => Ok(0),
            Some([count]) => Ok(*count),
            Some(value) => {
                error!("Invalid authentication attempts counter length: {}.", value.len());
                Err(HapError::Unknown)
            }
        }
    }

    fn get_m2(&mut self, session: &mut Session) -> Result<Tlv8, HapError> {
        debug!("Pair Setup M2: SRP Start Response.");

        if self.pair_setup.claim.is_none() || self.is_paired() {
            info!("Pair Setup M2: Accessory is already paired.");
            session.pair_setup.error = Some(PairingError::Unavailable);
            return Ok(Tlv8::new());
        }
        if self.unsuccessful_auth_attempts()? >= MAX_AUTH_ATTEMPTS {
            warn!(
                "Pair Setup M2: Accessory has received more than {} unsuccessful authentication attempts.",
                MAX_AUTH_ATTEMPTS
            );
            session.pair_setup.error = Some(PairingError::MaxTries);
            return Ok(Tlv8::new());
        }
        if self.pair_setup.claim != Some(session.id()) {
            info!("Pair Setup M2: Accessory is performing a Pair Setup procedure with a different controller.");
            session.pair_setup.error = Some(PairingError::Busy);
            return Ok(Tlv8::new());
        }

        let with_auth = session.pair_setup.method == Some(PairingMethod::PairSetupWithAuth);
        let mut is_transient = false;
        let mut is_split = false;
        if let Some(mut flags) = self.pair_setup.flags {
            if flags.is_transient() {
                if with_auth {
                    info!("Pair Setup M2: Ignoring kPairingFlag_Transient because Pair Setup with Auth was requested.");
                } else {
                    is_transient = true;
                }
                flags.remove(PairingFlags::TRANSIENT);
            }
            if flags.is_split() {
                if with_auth {
                    info!("Pair Setup M2: Ignoring kPairingFlag_Split because Pair Setup with Auth was requested.");
                } else {
                    is_split = true;
                }
                flags.remove(PairingFlags::SPLIT);
            }
            if !flags.is_empty() {
                info!(
                    "Pair Setup M2: Ignoring unrecognized kTLVType_Flags: 0x{:08X}.",
                    flags.raw()
                );
            }
        }
        debug!(
            "Pair Setup M2: Processing using kPairingFlag_Transient = {} / kPairingFlag_Split = {}.",
            is_transient, is_split
        );

        let Some(setup_info) = self.setup_info_for_pairing(!is_transient && is_split) else {
            info!("Pair Setup M2: kPairingFlag_Split requested but no previous setup info found.");
            session.pair_setup.error = Some(PairingError::Authentication);
            return Ok(Tlv8::new());
        };

        let b = Zeroizing::new(srp::generate_private_key());
        let public_b = srp::public_key(&b[..], &setup_info.verifier);
        self.pair_setup.b = b.to_vec();
        self.pair_setup.public_b = public_b.to_vec();

        let mut response = Tlv8::new();
        response.set(TlvType::State, [session.pair_setup.state]);
        response.set(TlvType::PublicKey, strip_leading_zeros(&public_b));
        response.set(TlvType::Salt, setup_info.salt);

        let mut flags = PairingFlags::empty();
        if is_split {
            flags.insert(PairingFlags::SPLIT);
            if is_transient {
                flags.insert(PairingFlags::TRANSIENT);
            }
        }
        if self.ownership.is_required() {
            flags.insert(PairingFlags::OWNERSHIP_PROOF_TOKEN);
        }
        if !flags.is_empty() {
            response.set(TlvType::Flags, flags.to_le_bytes_minimal());
        }
        Ok(response)
    }

    fn process_m3(&mut self, tlv: &Tlv8) -> Result<(), HapError> {
        debug!("Pair Setup M3: SRP Verify Request.");
        expect_state(tlv, "M3", 3)?;

        let public_a = match tlv.get(TlvType::PublicKey) {
            Some(a) if a.len() <= srp::N_BYTES => a,
            Some(a) => {
                warn!("Pair Setup M3: kTLVType_PublicKey has invalid length ({}).", a.len());
                return Err(HapError::InvalidData);
            }
            None => {
                warn!("Pair Setup M3: kTLVType_PublicKey missing.");
                return Err(HapError::InvalidData);
            }
        };
        let proof = match tlv.get(TlvType::Proof) {
            Some(p) if p.len() == srp::HASH_BYTES => p,
            Some(p) => {
                warn!("Pair Setup M3: kTLVType_Proof has invalid length ({}).", p.len());
                return Err(HapError::InvalidData);
            }
            None => {
                warn!("Pair Setup M3: kTLVType_Proof missing.");
                return Err(HapError::InvalidData);
            }
        };

        self.pair_setup.public_a = left_pad(public_a, srp::N_BYTES);
        self.pair_setup.controller_proof = proof.to_vec();
        Ok(())
    }

    fn record_failed_auth_attempt(&mut self) -> Result<(), HapError> {
        let attempts = self.unsuccessful_auth_attempts()?.saturating_add(1);
        self.store
            .set(domain::CONFIGURATION, key::UNSUCCESSFUL_AUTH_ATTEMPTS, &[attempts])
            .map_err(|e| {
                error!("Unable to store authentication attempts counter: {}", e);
                HapError::Unknown
            })?;
        warn!(
            "Pair Setup M4: Incorrect setup code. Unsuccessful authentication attempts = {} / {}.",
            attempts, MAX_AUTH_ATTEMPTS
        );
        Ok(())
    }

    fn get_m4(&mut self, session: &mut Session) -> Result<Tlv8, HapError> {
        debug!("Pair Setup M4: SRP Verify Response.");

        let method = session.pair_setup.method;
        let flags = self.pair_setup.flags;
        let restore = method == Some(PairingMethod::PairSetup)
            && flags.map_or(false, |f| !f.is_transient() && f.is_split());

        let u = srp::scrambling_parameter(&self.pair_setup.public_a, &self.pair_setup.public_b);
        let Some(setup_info) = self.setup_info_for_pairing(restore) else {
            info!("Pair Setup M4: No setup info available.");
            session.pair_setup.error = Some(PairingError::Authentication);
            return Ok(Tlv8::new());
        };
        let premaster = match srp::premaster_secret(
            &self.pair_setup.public_a,
            &self.pair_setup.b,
            &u,
            &setup_info.verifier,
        ) {
            Ok(s) => Zeroizing::new(s),
            Err(_) => {
                warn!("Pair Setup M4: Illegal key A.");
                session.pair_setup.error = Some(PairingError::Authentication);
                return Ok(Tlv8::new());
            }
        };
        let k = Zeroizing::new(srp::session_key(&premaster[..]));
        let expected = Zeroizing::new(srp::proof_m1(
            srp::PAIR_SETUP_USERNAME,
            &setup_info.salt,
            &self.pair_setup.public_a,
            &self.pair_setup.public_b,
            &k[..],
        ));
        if !srp::proofs_match(&expected[..], &self.pair_setup.controller_proof) {
            self.record_failed_auth_attempt()?;
            session.pair_setup.error = Some(PairingError::Authentication);
            return Ok(Tlv8::new());
        }

        self.store
            .remove(domain::CONFIGURATION, key::UNSUCCESSFUL_AUTH_ATTEMPTS)
            .map_err(|e| {
                error!("Unable to reset authentication attempts counter: {}", e);
                HapError::Unknown
            })?;

        let accessory_proof = srp::proof_m2(&self.pair_setup.public_a, &expected[..], &k[..]);
        self.pair_setup.session_key =
            hkdf::derive_pair_setup_key(&k[..]).map_err(|e| crypto_failure("M4", e))?;
        self.pair_setup.k = k.to_vec();
        self.pair_setup.accessory_proof = accessory_proof.to_vec();

        let mut response = Tlv8::new();
        response.set(TlvType::State, [session.pair_setup.state]);
        response.set(TlvType::Proof, accessory_proof);

        let product_data = self.primary_accessory.as_ref().and_then(|a| a.product_data);
        let with_auth = method == Some(PairingMethod::PairSetupWithAuth);
        if with_auth || product_data.is_some() {
            let mut sub = Tlv8::new();
            if with_auth {
                let mfi = match self.mfi.as_mut() {
                    Some(mfi) if mfi.is_available() => mfi,
                    _ => {
                        warn!("Pair Setup M4: Apple Authentication Coprocessor is not available.");
                        return Err(HapError::InvalidState);
                    }
                };
                info!("Using Apple Authentication Coprocessor.");
                let challenge =
                    hkdf::derive_mfi_challenge(&k[..]).map_err(|e| crypto_failure("M4", e))?;
                sub.set(TlvType::Signature, mfi.create_signature(&challenge)?);
                sub.set(TlvType::Certificate, mfi.copy_certificate()?);
            }
            if let Some(product_data) = product_data {
                sub.set(TlvType::ProductData, product_data);
            }
            let encrypted = chacha::encrypt_with_nonce(
                &self.pair_setup.session_key,
                &chacha::nonce_from_string(nonces::PS_MSG04),
                &sub.encode(),
            )
            .map_err(|e| crypto_failure("M4", e))?;
            response.set(TlvType::EncryptedData, encrypted);
        }

        if method == Some(PairingMethod::PairSetup) && flags.map_or(false, |f| f.is_transient()) {
            let keys =
                SessionKeys::derive_transient_accessory_keys(&k[..]).map_err(|e| crypto_failure("M4", e))?;
            session.secure = Some(SecureSession::transient(&keys, self.clock.now()));

            if flags.map_or(false, |f| f.is_split()) {
                self.pair_setup.keep_setup_info = true;
            } else {
                info!("Transient Pair Setup procedure requested without kHAPPairingFlag_Split.");
            }
            self.reset_pair_setup_for_session(session);
            info!("Transient Pair Setup procedure completed.");
            self.delegate.on_event(ServerEvent::SessionAccepted(session.id()));
        }
        Ok(response)
    }

    fn process_m5(&mut self, session: &mut Session, tlv: &Tlv8) -> Result<(), HapError> {
        debug!("Pair Setup M5: Exchange Request.");
        expect_state(tlv, "M5", 5)?;

        let encrypted = match tlv.get(TlvType::EncryptedData) {
            Some(data) if data.len() >= chacha::TAG_LEN => data,
            Some(data) => {
                warn!(
                    "Pair Setup M5: kTLVType_EncryptedData has invalid length ({}).",
                    data.len()
                );
                return Err(HapError::InvalidData);
            }
            None => {
                warn!("Pair Setup M5: kTLVType_EncryptedData missing.");
                return Err(HapError::InvalidData);
            }
        };
        let decrypted = match chacha::decrypt_with_nonce(
            &self.pair_setup.session_key,
            &chacha::nonce_from_string(nonces::PS_MSG05),
            encrypted,
        ) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!("Pair Setup M5: Failed to decrypt kTLVType_EncryptedData.");
                session.pair_setup.error = Some(PairingError::Authentication);
                return Ok(());
            }
        };
        let sub = Tlv8::parse(&decrypted)?;

        let identifier = match sub.get(TlvType::Identifier) {
            Some(id) if id.len() <= MAX_IDENTIFIER_LEN => id,
            Some(id) => {
                warn!("Pair Setup M5: kTLVType_Identifier has invalid length ({}).", id.len());
                return Err(HapError::InvalidData);
            }
            None => {
                warn!("Pair Setup M5: kTLVType_Identifier missing.");
                return Err(HapError::InvalidData);
            }
        };
        let ltpk: [u8; 32] = match sub.get(TlvType::PublicKey) {
            Some(pk) => pk.try_into().map_err(|_| {
                warn!("Pair Setup M5: kTLVType_PublicKey has invalid length ({}).", pk.len());
                HapError::InvalidData
            })?,
            None => {
                warn!("Pair Setup M5: kTLVType_PublicKey missing.");
                return Err(HapError::InvalidData);
            }
        };
        let signature: [u8; 64] = match sub.get(TlvType::Signature) {
            Some(sig) => sig.try_into().map_err(|_| {
                warn!("Pair Setup M5: kTLVType_Signature has invalid length ({}).", sig.len());
                HapError::InvalidData
            })?,
            None => {
                warn!("Pair Setup M5: kTLVType_Signature missing.");
                return Err(HapError::InvalidData);
            }
        };

        if self.ownership.is_required() {
            let now = self.clock.now();
            let valid = match sub.get(TlvType::OwnershipProofToken) {
                None => {
                    warn!("Pair Setup M5: kTLVType_OwnershipProofToken missing.");
                    false
                }
                Some(token) if token.len() != OwnershipProofToken::LEN => {
                    warn!(
                        "Pair Setup M5: kTLVType_OwnershipProofToken has invalid length ({}).",
                        token.len()
                    );
                    false
                }
                Some(token) => {
                    let valid = self.ownership.is_valid(token, now);
                    if !valid {
                        warn!("Pair Setup M5: kTLVType_OwnershipProofToken invalid.");
                    }
                    valid
                }
            };
            self.ownership.invalidate();
            if !valid {
                session.pair_setup.error = Some(PairingError::OwnershipFailure);
                return Ok(());
            }
        }

        let controller_x = Zeroizing::new(
            hkdf::derive_controller_sign_key(&self.pair_setup.k).map_err(|e| crypto_failure("M5", e))?,
        );
        let mut device_info = Zeroizing::new(Vec::with_capacity(
            controller_x.len() + identifier.len() + ltpk.len(),
        ));
        device_info.extend_from_slice(&controller_x[..]);
        device_info.extend_from_slice(identifier);
        device_info.extend_from_slice(&ltpk);
        if ed25519::verify(&ltpk, &device_info, &signature).is_err() {
            warn!("Pair Setup M5: iOSDeviceInfo signature is incorrect.");
            session.pair_setup.error = Some(PairingError::Authentication);
            return Ok(());
        }

        let pairing = Pairing::new(identifier, ltpk, PERMISSION_ADMIN).map_err(|_| HapError::InvalidData)?;
        let was_paired = self.is_paired();
        match pairing::add(&mut *self.store, &pairing, self.options.max_pairings) {
            Ok(index) => {
                debug!("Pair Setup M5: Stored pairing #{}.", index);
                self.handle_pairing_added(&pairing, was_paired);
            }
            Err(Error::Hap(HapError::OutOfResources)) => {
                warn!("Pair Setup M5: No space for additional pairings.");
                session.pair_setup.error = Some(PairingError::MaxPeers);
            }
            Err(e) => crate::store::fatal("Unable to store pairing", e),
        }
        Ok(())
    }

    fn get_m6(&mut self, session: &mut Session) -> Result<Tlv8, HapError> {
        debug!("Pair Setup M6: Exchange Response.");

        let identity = self.identity.as_ref().ok_or(HapError::InvalidState)?;
        let accessory_x = Zeroizing::new(
            hkdf::derive_accessory_sign_key(&self.pair_setup.k).map_err(|e| crypto_failure("M6", e))?,
        );
        let device_id = self.options.device_id.to_mac_string();
        let ltpk = identity.public_key();

        let mut accessory_info = Zeroizing::new(Vec::with_capacity(
            accessory_x.len() + device_id.len() + ltpk.len(),
        ));
        accessory_info.extend_from_slice(&accessory_x[..]);
        accessory_info.extend_from_slice(device_id.as_bytes());
        accessory_info.extend_from_slice(&ltpk);
        let signature = identity.sign(&accessory_info);

        let mut sub = Tlv8::new();
        sub.set(TlvType::Identifier, device_id.as_bytes());
        sub.set(TlvType::PublicKey, ltpk);
        sub.set(TlvType::Signature, signature);
        let encrypted = chacha::encrypt_with_nonce(
            &self.pair_setup.session_key,
            &chacha::nonce_from_string(nonces::PS_MSG06),
            &sub.encode(),
        )
        .map_err(|e| crypto_failure("M6", e))?;

        let mut response = Tlv8::new();
        response.set(TlvType::State, [session.pair_setup.state]);
        response.set(TlvType::EncryptedData, encrypted);

        self.reset_pair_setup_for_session(session);
        Ok(response)
    }

    /// Number of failed setup code attempts since the last success.
    pub fn unsuccessful_auth_attempt_count(&self) -> u8 {
        self.store
            .must_get(domain::CONFIGURATION, key::UNSUCCESSFUL_AUTH_ATTEMPTS)
            .and_then(|v| v.first().copied())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod helpers {
        use super::*;

        #[test]
        fn strips_only_leading_zeros() {
            assert_eq!(strip_leading_zeros(&[0, 0, 1, 0, 2]), &[1, 0, 2]);
            assert_eq!(strip_leading_zeros(&[3, 0]), &[3, 0]);
            assert!(strip_leading_zeros(&[0, 0]).is_empty());
        }

        #[test]
        fn pads_on_the_left() {
            assert_eq!(left_pad(&[7, 8], 4), vec![0, 0, 7, 8]);
            assert_eq!(left_pad(&[1, 2, 3], 3), vec![1, 2, 3]);
        }

        #[test]
        fn state_must_be_single_expected_byte() {
            let mut tlv = Tlv8::new();
            assert_eq!(expect_state(&tlv, "M3", 3), Err(HapError::InvalidData));

            tlv.set(TlvType::State, [3u8]);
            assert_eq!(expect_state(&tlv, "M3", 3), Ok(()));
            assert_eq!(expect_state(&tlv, "M5", 5), Err(HapError::InvalidData));

            tlv.set(TlvType::State, [3u8, 0]);
            assert_eq!(expect_state(&tlv, "M3", 3), Err(HapError::InvalidData));
        }
    }
}
