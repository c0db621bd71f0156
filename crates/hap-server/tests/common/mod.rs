//! Shared fixtures: a controller simulator and recording fakes.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hap_core::{Accessory, Category, HapError, PairingError, PairingFlags, Service, ServiceKind};
use hap_crypto::chacha::{self, nonces};
use hap_crypto::srp::{self, SrpChallenge, SrpClient, SrpProof};
use hap_crypto::{ed25519, hkdf, IdentityKeyPair, Tlv8, TlvType};
use hap_server::pairing::{self, Pairing, PERMISSION_ADMIN};
use hap_server::store::{domain, key};
use hap_server::{
    AccessoryServer, AdvertisingData, CallbackDelegate, KeyValueStore, ManualClock, MemoryStore,
    MfiAuth, PairingMethod, ServerBuilder, ServerEngine, ServerEvent, ServerState, Session,
    SessionId, SetupCode, SetupDisplay, SetupNfc, SetupPayload, Transport, TransportKind,
};
use tracing_subscriber::EnvFilter;

pub const SETUP_CODE: &str = "518-08-582";

pub fn lightbulb() -> Accessory {
    Accessory {
        aid: Accessory::PRIMARY_AID,
        category: Category::LIGHTING,
        name: "Lightbulb".to_string(),
        manufacturer: "Acme".to_string(),
        model: "LB1".to_string(),
        serial_number: "099DB48E9E28".to_string(),
        firmware_version: "1.0".to_string(),
        hardware_version: None,
        product_data: None,
        services: vec![
            Service::new(1, ServiceKind::AccessoryInformation),
            Service::new(0x10, ServiceKind::ProtocolInformation),
            Service::new(0x20, ServiceKind::Pairing),
        ],
    }
}

pub fn bridged(aid: u64) -> Accessory {
    Accessory {
        aid,
        category: Category::BRIDGED_ACCESSORY,
        name: format!("Bridged {}", aid),
        ..lightbulb()
    }
}

// ============================================================================
// Recording fakes
// ============================================================================

/// What a [`FakeTransport`] has been asked to do.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub starts: usize,
    pub prepare_stops: usize,
    pub stops: usize,
    pub advertising: Option<AdvertisingData>,
    pub events: Vec<(u64, u64, Option<SessionId>)>,
}

pub struct FakeTransport {
    kind: TransportKind,
    log: Rc<RefCell<TransportLog>>,
    stops_immediately: Rc<Cell<bool>>,
    engine: Option<FakeEngine>,
}

impl FakeTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            log: Rc::default(),
            stops_immediately: Rc::new(Cell::new(true)),
            engine: None,
        }
    }

    pub fn with_engine(mut self, engine: FakeEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn log(&self) -> Rc<RefCell<TransportLog>> {
        self.log.clone()
    }

    /// Whether `try_stop` completes synchronously.
    pub fn stops_immediately(&self) -> Rc<Cell<bool>> {
        self.stops_immediately.clone()
    }
}

impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn start(&mut self, advertising: &AdvertisingData) {
        let mut log = self.log.borrow_mut();
        log.starts += 1;
        log.advertising = Some(advertising.clone());
    }

    fn prepare_stop(&mut self) {
        self.log.borrow_mut().prepare_stops += 1;
    }

    fn try_stop(&mut self) -> bool {
        self.log.borrow_mut().stops += 1;
        self.stops_immediately.get()
    }

    fn update_advertising_data(&mut self, advertising: &AdvertisingData) {
        self.log.borrow_mut().advertising = Some(advertising.clone());
    }

    fn did_raise_event(&mut self, aid: u64, iid: u64, session: Option<SessionId>) {
        self.log.borrow_mut().events.push((aid, iid, session));
    }

    fn server_engine(&self) -> Option<&dyn ServerEngine> {
        self.engine.as_ref().map(|e| e as &dyn ServerEngine)
    }

    fn server_engine_mut(&mut self) -> Option<&mut dyn ServerEngine> {
        self.engine.as_mut().map(|e| e as &mut dyn ServerEngine)
    }
}

/// Server engine whose state is visible to the test.
#[derive(Clone)]
pub struct FakeEngine {
    pub state: Rc<Cell<ServerState>>,
    pub calls: Rc<RefCell<Vec<&'static str>>>,
    /// Whether `stop` reaches Idle synchronously.
    pub stops_immediately: Rc<Cell<bool>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Rc::new(Cell::new(ServerState::Idle)),
            calls: Rc::default(),
            stops_immediately: Rc::new(Cell::new(true)),
        }
    }
}

impl ServerEngine for FakeEngine {
    fn init(&mut self) {
        self.calls.borrow_mut().push("init");
    }

    fn deinit(&mut self) -> Result<(), HapError> {
        self.calls.borrow_mut().push("deinit");
        Ok(())
    }

    fn state(&self) -> ServerState {
        self.state.get()
    }

    fn start(&mut self) {
        self.calls.borrow_mut().push("start");
        self.state.set(ServerState::Running);
    }

    fn stop(&mut self) -> Result<(), HapError> {
        self.calls.borrow_mut().push("stop");
        if self.stops_immediately.get() {
            self.state.set(ServerState::Idle);
        } else {
            self.state.set(ServerState::Stopping);
        }
        Ok(())
    }

    fn raise_event(&mut self, _aid: u64, _iid: u64) -> Result<(), HapError> {
        self.calls.borrow_mut().push("raise_event");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DisplayLog {
    pub payload: Option<SetupPayload>,
    pub code: Option<SetupCode>,
    pub updates: usize,
    pub pairing_starts: usize,
    pub pairing_stops: usize,
}

#[derive(Clone, Default)]
pub struct FakeDisplay(pub Rc<RefCell<DisplayLog>>);

impl FakeDisplay {
    pub fn code(&self) -> Option<String> {
        self.0.borrow().code.as_ref().map(|c| c.as_str().to_string())
    }
}

impl SetupDisplay for FakeDisplay {
    fn update_setup_payload(&mut self, payload: Option<&SetupPayload>, code: Option<&SetupCode>) {
        let mut log = self.0.borrow_mut();
        log.payload = payload.cloned();
        log.code = code.cloned();
        log.updates += 1;
    }

    fn handle_start_pairing(&mut self) {
        self.0.borrow_mut().pairing_starts += 1;
    }

    fn handle_stop_pairing(&mut self) {
        self.0.borrow_mut().pairing_stops += 1;
    }
}

#[derive(Clone, Default)]
pub struct FakeNfc(pub Rc<RefCell<Vec<(SetupPayload, bool)>>>);

impl FakeNfc {
    pub fn last(&self) -> Option<(SetupPayload, bool)> {
        self.0.borrow().last().cloned()
    }
}

impl SetupNfc for FakeNfc {
    fn update_setup_payload(&mut self, payload: &SetupPayload, is_pairable: bool) {
        self.0.borrow_mut().push((payload.clone(), is_pairable));
    }
}

/// Authentication coprocessor returning canned values.
pub struct FakeMfi {
    pub available: bool,
    pub challenges: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl FakeMfi {
    pub const SIGNATURE: &'static [u8] = b"mfi-signature";
    pub const CERTIFICATE: &'static [u8] = b"mfi-certificate";

    pub fn new(available: bool) -> Self {
        Self {
            available,
            challenges: Rc::default(),
        }
    }
}

impl MfiAuth for FakeMfi {
    fn is_available(&self) -> bool {
        self.available
    }

    fn create_signature(&mut self, challenge: &[u8]) -> Result<Vec<u8>, HapError> {
        self.challenges.borrow_mut().push(challenge.to_vec());
        Ok(Self::SIGNATURE.to_vec())
    }

    fn copy_certificate(&mut self) -> Result<Vec<u8>, HapError> {
        Ok(Self::CERTIFICATE.to_vec())
    }
}

pub type EventLog = Rc<RefCell<Vec<ServerEvent>>>;

/// Route server logs through the test harness. `RUST_LOG=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Builder wired to a manual clock and an event recorder.
pub fn builder(clock: &ManualClock, events: &EventLog) -> ServerBuilder {
    init_tracing();
    let sink = events.clone();
    AccessoryServer::builder()
        .clock(clock.clone())
        .delegate(CallbackDelegate::new(move |e| sink.borrow_mut().push(e)))
}

// ============================================================================
// Controller simulator
// ============================================================================

/// A controller running Pair-Setup against the server.
pub struct Controller {
    pub identifier: Vec<u8>,
    pub identity: IdentityKeyPair,
    method: PairingMethod,
    client: Option<SrpClient>,
    proof: Option<SrpProof>,
    session_key: [u8; 32],
}

impl Controller {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.as_bytes().to_vec(),
            identity: IdentityKeyPair::generate(),
            method: PairingMethod::PairSetup,
            client: None,
            proof: None,
            session_key: [0; 32],
        }
    }

    pub fn with_auth(mut self) -> Self {
        self.method = PairingMethod::PairSetupWithAuth;
        self
    }

    pub fn m1(&self) -> Vec<u8> {
        Tlv8::pair_setup_m1(self.method.as_byte()).encode()
    }

    pub fn m1_with_flags(&self, flags: u32) -> Vec<u8> {
        Tlv8::pair_setup_m1_with_flags(self.method.as_byte(), &PairingFlags(flags).to_le_bytes_minimal())
            .encode()
    }

    /// Answer M2 using `code`.
    pub fn m3(&mut self, m2: &[u8], code: &str) -> Vec<u8> {
        let m2 = Tlv8::parse(m2).unwrap();
        assert_eq!(m2.state(), Some(2), "unexpected M2: {:?}", m2.error_description());
        let salt: [u8; 16] = m2.get(TlvType::Salt).unwrap().try_into().unwrap();
        let challenge = SrpChallenge {
            salt,
            server_public_key: m2.get(TlvType::PublicKey).unwrap().to_vec(),
        };

        let client = SrpClient::new(srp::PAIR_SETUP_USERNAME, code.as_bytes());
        let proof = client.process_challenge(&challenge).unwrap();

        let mut m3 = Tlv8::new();
        m3.set(TlvType::State, vec![3]);
        m3.set(TlvType::PublicKey, client.public_key());
        m3.set(TlvType::Proof, proof.client_proof.clone());

        self.client = Some(client);
        self.proof = Some(proof);
        m3.encode()
    }

    /// Check the accessory proof in M4 and derive the encryption key.
    pub fn verify_m4(&mut self, m4: &[u8]) -> Tlv8 {
        let m4 = Tlv8::parse(m4).unwrap();
        assert_eq!(m4.state(), Some(4));
        assert!(m4.error().is_none(), "unexpected M4: {:?}", m4.error_description());

        let client = self.client.as_ref().unwrap();
        let proof = self.proof.as_ref().unwrap();
        assert!(client.verify_server_proof(m4.get(TlvType::Proof).unwrap(), &proof.expected_server_proof));
        self.session_key = hkdf::derive_pair_setup_key(&proof.shared_secret).unwrap();
        m4
    }

    /// Decrypt the optional M4 sub-TLV.
    pub fn open_m4(&self, m4: &Tlv8) -> Tlv8 {
        let plaintext = chacha::decrypt_with_nonce(
            &self.session_key,
            &chacha::nonce_from_string(nonces::PS_MSG04),
            m4.get(TlvType::EncryptedData).unwrap(),
        )
        .unwrap();
        Tlv8::parse(&plaintext).unwrap()
    }

    pub fn shared_secret(&self) -> &[u8] {
        &self.proof.as_ref().unwrap().shared_secret
    }

    pub fn m5(&self) -> Vec<u8> {
        self.m5_with(|_| {})
    }

    /// Build M5, letting the caller add to the encrypted sub-TLV.
    pub fn m5_with(&self, extra: impl FnOnce(&mut Tlv8)) -> Vec<u8> {
        let controller_x = hkdf::derive_controller_sign_key(self.shared_secret()).unwrap();
        let ltpk = self.identity.public_key();
        let mut info = controller_x.to_vec();
        info.extend_from_slice(&self.identifier);
        info.extend_from_slice(&ltpk);

        let mut sub = Tlv8::new();
        sub.set(TlvType::Identifier, self.identifier.clone());
        sub.set(TlvType::PublicKey, ltpk.to_vec());
        sub.set(TlvType::Signature, self.identity.sign(&info).to_vec());
        extra(&mut sub);

        let encrypted = chacha::encrypt_with_nonce(
            &self.session_key,
            &chacha::nonce_from_string(nonces::PS_MSG05),
            &sub.encode(),
        )
        .unwrap();

        let mut m5 = Tlv8::new();
        m5.set(TlvType::State, vec![5]);
        m5.set(TlvType::EncryptedData, encrypted);
        m5.encode()
    }

    /// Check the accessory identity in M6.
    pub fn verify_m6(&self, m6: &[u8], device_id: &str, accessory_ltpk: [u8; 32]) {
        let m6 = Tlv8::parse(m6).unwrap();
        assert_eq!(m6.state(), Some(6));
        assert!(m6.error().is_none(), "unexpected M6: {:?}", m6.error_description());

        let plaintext = chacha::decrypt_with_nonce(
            &self.session_key,
            &chacha::nonce_from_string(nonces::PS_MSG06),
            m6.get(TlvType::EncryptedData).unwrap(),
        )
        .unwrap();
        let sub = Tlv8::parse(&plaintext).unwrap();

        let identifier = sub.get(TlvType::Identifier).unwrap();
        assert_eq!(identifier, device_id.as_bytes());
        let ltpk: [u8; 32] = sub.get(TlvType::PublicKey).unwrap().try_into().unwrap();
        assert_eq!(ltpk, accessory_ltpk);
        let signature: [u8; 64] = sub.get(TlvType::Signature).unwrap().try_into().unwrap();

        let accessory_x = hkdf::derive_accessory_sign_key(self.shared_secret()).unwrap();
        let mut info = accessory_x.to_vec();
        info.extend_from_slice(identifier);
        info.extend_from_slice(&ltpk);
        ed25519::verify(&ltpk, &info, &signature).unwrap();
    }
}

/// Run M1 through M4 on `session`.
pub fn run_to_m4(
    server: &mut AccessoryServer,
    session: &mut Session,
    controller: &mut Controller,
    m1: &[u8],
    code: &str,
) -> Tlv8 {
    server.handle_pair_setup_write(session, m1).unwrap();
    let m2 = server.handle_pair_setup_read(session).unwrap();
    let m3 = controller.m3(&m2, code);
    server.handle_pair_setup_write(session, &m3).unwrap();
    let m4 = server.handle_pair_setup_read(session).unwrap();
    controller.verify_m4(&m4)
}

/// Complete Pair-Setup for `controller` on a fresh IP session.
pub fn pair(server: &mut AccessoryServer, controller: &mut Controller, code: &str) -> Session {
    let mut session = server.create_session(TransportKind::Ip);
    let m1 = controller.m1();
    run_to_m4(server, &mut session, controller, &m1, code);

    server
        .handle_pair_setup_write(&mut session, &controller.m5())
        .unwrap();
    let m6 = server.handle_pair_setup_read(&mut session).unwrap();
    let device_id = server.options().device_id.to_mac_string();
    let ltpk = server.identity_public_key().unwrap();
    controller.verify_m6(&m6, &device_id, ltpk);
    session
}

/// Assert that `response` is a `{State, Error}` TLV.
pub fn assert_error(response: &[u8], state: u8, error: PairingError) {
    let tlv = Tlv8::parse(response).unwrap();
    assert_eq!(tlv.state(), Some(state));
    assert_eq!(tlv.error(), Some(error.as_byte()), "got {:?}", tlv.error_description());
    assert_eq!(tlv.get(TlvType::PublicKey), None);
}

/// Store of an accessory that already has an identity and an admin pairing.
pub fn paired_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .set(domain::CONFIGURATION, key::LTSK, &[0x42; 32])
        .unwrap();
    let admin = Pairing::new(b"admin-controller", [0x07; 32], PERMISSION_ADMIN).unwrap();
    pairing::add(&mut store, &admin, 16).unwrap();
    store
}
