//! Accessory server lifecycle.
//!
//! ```text
//! Idle --start--> Running --stop--> Stopping --transports stopped--> Idle
//! ```
//!
//! The server is driven by the embedding event loop: requests arrive through
//! the pairing handlers and deadlines are delivered via
//! [`AccessoryServer::process_timers`]. Nothing here blocks.

use crate::config::{MfiAuth, ServerBuilder, ServerOptions};
use crate::delegate::{ServerDelegate, ServerEvent};
use crate::ownership::{OwnershipProofToken, SetupOwnership};
use crate::pair_setup::PairSetupScratch;
use crate::pairing::{self, Pairing};
use crate::session::{Session, SessionId};
use crate::setup::{self, AccessorySetup, SetupDisplay, SetupNfc};
use crate::setup_info::SetupInfoState;
use crate::store::{self, domain, fatal, key, KeyValueStore, StoreExt};
use crate::timer::{Clock, TimerEvent, TimerId, TimerQueue};
use crate::transport::{AdvertisingData, ServerEngine, Transport, TransportKind};
use hap_core::{
    Accessory, Category, FirmwareVersion, HapError, PairingFeatureFlags, StatusFlags,
};
use hap_crypto::IdentityKeyPair;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Base heart beat interval.
const HEART_BEAT_INTERVAL: Duration = Duration::from_secs(240 * 60);
/// Random extension of each heart beat interval.
const HEART_BEAT_JITTER: Duration = Duration::from_secs(60 * 60);

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    Stopping,
}

struct TransportSlot {
    driver: Box<dyn Transport>,
    is_running: bool,
    is_stopping: bool,
    /// Restart once the pending stop completes.
    should_start: bool,
    stop_when_disconnected: bool,
    is_connected: bool,
}

impl TransportSlot {
    fn new(driver: Box<dyn Transport>) -> Self {
        Self {
            driver,
            is_running: false,
            is_stopping: false,
            should_start: false,
            stop_when_disconnected: false,
            is_connected: false,
        }
    }

    fn kind(&self) -> TransportKind {
        self.driver.kind()
    }
}

#[derive(Debug, Default)]
struct HeartBeat {
    timer: Option<TimerId>,
    value: u32,
}

/// A HomeKit accessory server.
///
/// Created with [`ServerBuilder`].
pub struct AccessoryServer {
    state: ServerState,
    pub(crate) options: ServerOptions,
    pub(crate) store: Box<dyn KeyValueStore>,
    transports: Vec<TransportSlot>,
    pub(crate) delegate: Box<dyn ServerDelegate>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) timers: TimerQueue,
    pub(crate) accessory_setup: Box<dyn AccessorySetup>,
    pub(crate) display: Option<Box<dyn SetupDisplay>>,
    pub(crate) nfc: Option<Box<dyn SetupNfc>>,
    pub(crate) mfi: Option<Box<dyn MfiAuth>>,
    pub(crate) primary_accessory: Option<Accessory>,
    bridged_accessories: Vec<Accessory>,
    pub(crate) identity: Option<IdentityKeyPair>,
    pub(crate) pair_setup: PairSetupScratch,
    pub(crate) setup: SetupInfoState,
    pub(crate) ownership: SetupOwnership,
    keep_ble_on: bool,
    callback_timer: Option<TimerId>,
    stop_timer: Option<TimerId>,
    unpaired_timer: Option<TimerId>,
    heart_beat: HeartBeat,
    next_session_id: u64,
}

impl AccessoryServer {
    /// Create a builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn from_builder(builder: ServerBuilder) -> Result<Self, HapError> {
        let store = builder.store.ok_or(HapError::InvalidData)?;
        let accessory_setup = builder.accessory_setup.ok_or(HapError::InvalidData)?;
        let ownership = SetupOwnership::new(builder.options.ownership_token_lifetime);

        let mut server = Self {
            state: ServerState::Idle,
            options: builder.options,
            store,
            transports: builder.transports.into_iter().map(TransportSlot::new).collect(),
            delegate: builder.delegate,
            clock: builder.clock,
            timers: TimerQueue::new(),
            accessory_setup,
            display: builder.display,
            nfc: builder.nfc,
            mfi: builder.mfi,
            primary_accessory: None,
            bridged_accessories: Vec::new(),
            identity: None,
            pair_setup: PairSetupScratch::default(),
            setup: SetupInfoState::default(),
            ownership,
            keep_ble_on: false,
            callback_timer: None,
            stop_timer: None,
            unpaired_timer: None,
            heart_beat: HeartBeat::default(),
            next_session_id: 0,
        };

        if let Some(engine) = server.engine_mut() {
            engine.init();
        }
        debug!(
            "Accessory server created for {} with {} transport(s).",
            server.options.device_id,
            server.transports.len()
        );
        Ok(server)
    }

    // ============================================================================
    // Accessors
    // ============================================================================

    /// Current state, as reported by the server engine when there is one.
    pub fn state(&self) -> ServerState {
        match self.engine() {
            Some(engine) => engine.state(),
            None => self.state,
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn primary_accessory(&self) -> Option<&Accessory> {
        self.primary_accessory.as_ref()
    }

    pub fn bridged_accessories(&self) -> &[Accessory] {
        &self.bridged_accessories
    }

    pub fn key_value_store(&self) -> &dyn KeyValueStore {
        &*self.store
    }

    pub fn key_value_store_mut(&mut self) -> &mut dyn KeyValueStore {
        &mut *self.store
    }

    /// Long-term public key, available once the server has started.
    pub fn identity_public_key(&self) -> Option<[u8; 32]> {
        self.identity.as_ref().map(|i| i.public_key())
    }

    pub fn heart_beat(&self) -> u32 {
        self.heart_beat.value
    }

    pub fn is_pair_setup_in_progress(&self) -> bool {
        self.pair_setup.claim.is_some()
    }

    /// Whether at least one controller is paired.
    pub fn is_paired(&self) -> bool {
        pairing::is_paired(&*self.store)
            .unwrap_or_else(|e| fatal("Unable to determine pairing state", e))
    }

    pub fn has_transport(&self, kind: TransportKind) -> bool {
        self.slot(kind).is_some()
    }

    pub fn is_transport_running(&self, kind: TransportKind) -> bool {
        self.slot(kind).map_or(false, |s| s.is_running)
    }

    fn slot(&self, kind: TransportKind) -> Option<&TransportSlot> {
        self.transports.iter().find(|s| s.kind() == kind)
    }

    fn slot_mut(&mut self, kind: TransportKind) -> Option<&mut TransportSlot> {
        self.transports.iter_mut().find(|s| s.kind() == kind)
    }

    fn engine(&self) -> Option<&dyn ServerEngine> {
        self.transports.iter().find_map(|s| s.driver.server_engine())
    }

    fn engine_mut(&mut self) -> Option<&mut dyn ServerEngine> {
        self.transports
            .iter_mut()
            .find_map(|s| s.driver.server_engine_mut())
    }

    // ============================================================================
    // Advertising
    // ============================================================================

    pub fn status_flags(&self) -> StatusFlags {
        if self.is_paired() {
            StatusFlags::default()
        } else {
            StatusFlags(StatusFlags::NOT_PAIRED)
        }
    }

    pub fn pairing_feature_flags(&self) -> PairingFeatureFlags {
        let mut flags = PairingFeatureFlags::default();
        if let Some(mfi) = &self.mfi {
            if mfi.is_available() {
                flags.0 |= PairingFeatureFlags::SUPPORTS_AUTHENTICATION_COPROCESSOR;
            }
            if mfi.supports_token_auth() {
                flags.0 |= PairingFeatureFlags::SUPPORTS_SOFTWARE_AUTHENTICATION;
            }
        }
        flags
    }

    /// Values transports should currently advertise.
    pub fn advertising_data(&mut self) -> AdvertisingData {
        let device_id = self.options.device_id;
        let setup_hash = self
            .accessory_setup
            .load_setup_id()
            .map(|id| setup::setup_hash(&id, &device_id));
        let (name, model, category) = match &self.primary_accessory {
            Some(a) => (a.name.clone(), a.model.clone(), a.category),
            None => (String::new(), String::new(), Category::OTHER),
        };
        AdvertisingData {
            device_id,
            name,
            model,
            category,
            config_number: self.config_number(),
            status_flags: self.status_flags(),
            feature_flags: self.pairing_feature_flags(),
            setup_hash,
            is_discoverable: self.state == ServerState::Running,
        }
    }

    fn update_advertising(&mut self) {
        if self.primary_accessory.is_none() {
            return;
        }
        let data = self.advertising_data();
        for slot in self.transports.iter_mut().filter(|s| s.is_running) {
            slot.driver.update_advertising_data(&data);
        }
    }

    // ============================================================================
    // Configuration number
    // ============================================================================

    fn load_config_number(&mut self) -> u32 {
        match self
            .store
            .must_get(domain::CONFIGURATION, key::CONFIGURATION_NUMBER)
        {
            None => {
                self.store
                    .must_set(domain::CONFIGURATION, key::CONFIGURATION_NUMBER, &1u32.to_le_bytes());
                1
            }
            Some(bytes) => match <[u8; 4]>::try_from(bytes.as_slice()) {
                Ok(cn) => u32::from_le_bytes(cn),
                Err(_) => fatal(
                    "Key-value store corrupted - unexpected length for configuration number",
                    bytes.len(),
                ),
            },
        }
    }

    /// Configuration number in its 16-bit form, never 0.
    pub fn config_number(&mut self) -> u16 {
        let cn = self.load_config_number();
        ((cn.wrapping_sub(1) % 65535) + 1) as u16
    }

    /// Configuration number in its 8-bit form, never 0.
    pub fn config_number_legacy(&mut self) -> u8 {
        let cn = self.load_config_number();
        ((cn.wrapping_sub(1) % 255) + 1) as u8
    }

    /// Bump the configuration number after the accessory database changed.
    pub fn increment_config_number(&mut self) {
        let cn = match self
            .store
            .must_get(domain::CONFIGURATION, key::CONFIGURATION_NUMBER)
        {
            None => 1,
            Some(_) => match self.load_config_number() {
                u32::MAX => 1,
                cn => cn + 1,
            },
        };
        self.store
            .must_set(domain::CONFIGURATION, key::CONFIGURATION_NUMBER, &cn.to_le_bytes());
        info!("Updated CN: {}", cn);
        self.update_advertising();
    }

    // ============================================================================
    // Start
    // ============================================================================

    fn validate_accessories(
        &self,
        primary: &Accessory,
        bridged: &[Accessory],
    ) -> Result<FirmwareVersion, HapError> {
        primary.validate_primary().map_err(|e| {
            warn!("Invalid primary accessory: {}", e);
            HapError::InvalidData
        })?;
        let firmware = primary.firmware_version().map_err(|e| {
            warn!("Invalid firmware version {:?}: {}", primary.firmware_version, e);
            HapError::InvalidData
        })?;

        let mut aids = HashSet::new();
        for accessory in bridged {
            accessory.validate_bridged().map_err(|e| {
                warn!("Invalid bridged accessory: {}", e);
                HapError::InvalidData
            })?;
            if !aids.insert(accessory.aid) {
                warn!("Duplicate bridged accessory aid {}.", accessory.aid);
                return Err(HapError::InvalidData);
            }
        }

        for slot in &self.transports {
            slot.driver.validate_accessory(primary)?;
        }
        Ok(firmware)
    }

    fn skips_transport(&self, kind: TransportKind) -> bool {
        kind == TransportKind::Ble && self.has_transport(TransportKind::Thread) && !self.keep_ble_on
    }

    fn handle_firmware_version(&mut self, current: FirmwareVersion) {
        match self
            .store
            .must_get(domain::CONFIGURATION, key::FIRMWARE_VERSION)
        {
            Some(bytes) => {
                let previous = FirmwareVersion::from_bytes(&bytes).unwrap_or_else(|| {
                    fatal(
                        "Key-value store corrupted - unexpected length for firmware revision",
                        bytes.len(),
                    )
                });
                if previous == current {
                    return;
                }
                if previous > current {
                    error!(
                        "[{} > {}] Accessory must not allow a firmware image to be downgraded!",
                        previous, current
                    );
                }
                info!("[{} > {}] Performing post firmware update tasks.", previous, current);
                self.increment_config_number();
                self.delegate
                    .on_event(ServerEvent::FirmwareUpdated { previous, current });
            }
            None => info!("[{}] Storing initial firmware version.", current),
        }
        self.store
            .must_set(domain::CONFIGURATION, key::FIRMWARE_VERSION, &current.to_bytes());
    }

    fn load_identity(&mut self) {
        let identity = match self.store.must_get(domain::CONFIGURATION, key::LTSK) {
            Some(bytes) => {
                let bytes = Zeroizing::new(bytes);
                let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
                    bytes.as_slice().try_into().unwrap_or_else(|_| {
                        fatal("Key-value store corrupted - unexpected length for LTSK", bytes.len())
                    }),
                );
                IdentityKeyPair::from_seed(&seed)
            }
            None => {
                info!("Generating long-term key pair.");
                self.remove_all_pairings();
                let identity = IdentityKeyPair::generate();
                let seed = Zeroizing::new(identity.seed());
                self.store.must_set(domain::CONFIGURATION, key::LTSK, &*seed);
                identity
            }
        };
        self.identity = Some(identity);
    }

    /// Pairings without any admin cannot be managed and are dropped.
    fn cleanup_pairings(&mut self) {
        let has_admin = pairing::has_admin(&*self.store)
            .unwrap_or_else(|e| fatal("Unable to enumerate pairings", e));
        if has_admin {
            return;
        }
        if self.is_paired() {
            info!("No admin pairing found. Removing all pairings.");
            self.schedule_handle_updated_state();
            self.remove_all_pairings();
        }
        self.store
            .must_remove(domain::CONFIGURATION, key::BLE_BROADCAST_PARAMETERS);
    }

    fn prepare_start(&mut self, primary: Accessory, bridged: Vec<Accessory>) -> Result<(), HapError> {
        if self.state != ServerState::Idle || self.primary_accessory.is_some() {
            warn!("Accessory server has already been started.");
            return Err(HapError::InvalidState);
        }
        let firmware = self.validate_accessories(&primary, &bridged)?;

        let compatible = store::is_compatible(&*self.store)
            .unwrap_or_else(|e| fatal("Unable to read key-value store version", e));
        if !compatible {
            error!("Key-value store is not compatible! Not starting accessory server.");
            return Ok(());
        }
        store::stamp_schema_version(&mut *self.store)
            .unwrap_or_else(|e| fatal("Unable to write key-value store version", e));

        info!("Accessory server starting.");
        self.state = ServerState::Running;
        self.schedule_handle_updated_state();

        for i in 0..self.transports.len() {
            if !self.skips_transport(self.transports[i].kind()) {
                self.transports[i].driver.prepare_start();
            }
        }

        self.handle_firmware_version(firmware);

        self.primary_accessory = Some(primary);
        self.bridged_accessories = bridged;
        if let Some(accessory) = &self.primary_accessory {
            for slot in &mut self.transports {
                slot.driver.will_start(accessory);
            }
        }

        self.load_identity();
        self.cleanup_pairings();

        let data = self.advertising_data();
        for i in 0..self.transports.len() {
            let kind = self.transports[i].kind();
            if self.skips_transport(kind) {
                debug!("Not starting {} transport while Thread is available.", kind);
                continue;
            }
            let slot = &mut self.transports[i];
            slot.driver.start(&data);
            slot.is_running = true;
        }

        self.setup_info_handle_server_start();
        self.update_advertising();
        self.update_unpaired_state_timer();
        self.heart_beat.value = 1;
        self.schedule_heart_beat();
        Ok(())
    }

    fn start_engine(&mut self) {
        if self.state != ServerState::Running {
            return;
        }
        if let Some(engine) = self.engine_mut() {
            engine.start();
        }
    }

    /// Start serving a single accessory.
    pub fn start(&mut self, accessory: Accessory) -> Result<(), HapError> {
        self.prepare_start(accessory, Vec::new())?;
        self.start_engine();
        Ok(())
    }

    /// Start serving a bridge and the accessories behind it.
    pub fn start_bridge(
        &mut self,
        bridge: Accessory,
        bridged: Vec<Accessory>,
        configuration_changed: bool,
    ) -> Result<(), HapError> {
        self.prepare_start(bridge, bridged)?;
        if self.state == ServerState::Running && configuration_changed {
            info!("Configuration changed. Incrementing CN.");
            self.increment_config_number();
        }
        self.start_engine();
        Ok(())
    }

    // ============================================================================
    // Stop
    // ============================================================================

    /// Request a stop. Runs on the next [`AccessoryServer::process_timers`].
    pub fn stop(&mut self) {
        if self.stop_timer.is_some() {
            return;
        }
        let now = self.clock.now();
        self.stop_timer = Some(self.timers.register(now, TimerEvent::DeferredStop));
    }

    /// Stop immediately.
    pub fn force_stop(&mut self) {
        if let Some(timer) = self.stop_timer.take() {
            self.timers.deregister(timer);
        }
        self.stop_now();
    }

    fn handle_stop_timer(&mut self, timer: TimerId) {
        if self.stop_timer != Some(timer) {
            return;
        }
        self.stop_timer = None;
        self.stop_now();
    }

    fn try_stop_transports(&mut self) -> bool {
        let mut all_stopped = true;
        for slot in self.transports.iter_mut().filter(|s| s.is_running) {
            if !slot.is_stopping {
                slot.is_stopping = true;
                slot.should_start = false;
                if slot.driver.try_stop() {
                    slot.is_running = false;
                    slot.is_stopping = false;
                    continue;
                }
            }
            debug!("Waiting for {} transport to stop.", slot.kind());
            all_stopped = false;
        }
        all_stopped
    }

    fn stop_now(&mut self) {
        if self.state == ServerState::Idle {
            return;
        }
        if self.state != ServerState::Stopping {
            info!("Accessory server shutting down.");
            self.state = ServerState::Stopping;
            if self.engine().is_none() {
                self.delegate
                    .on_event(ServerEvent::UpdatedState(ServerState::Stopping));
            }
            self.update_advertising();
            for slot in &mut self.transports {
                slot.driver.prepare_stop();
            }
        }

        if let Some(timer) = self.unpaired_timer.take() {
            self.timers.deregister(timer);
            debug!("Unpaired state timer stopped.");
        }

        if !self.try_stop_transports() {
            return;
        }

        if let Some(engine) = self.engine_mut() {
            if engine.state() == ServerState::Running {
                if let Err(e) = engine.stop() {
                    fatal("Server engine failed to stop", e);
                }
            }
            self.schedule_handle_updated_state();
            return;
        }
        self.complete_shutdown();
    }

    fn complete_shutdown(&mut self) {
        if self.pair_setup.claim.is_some() {
            warn!("Pair Setup procedure still in progress at shutdown. Aborting it.");
            self.release_pair_setup_claim();
        }
        self.setup_info_handle_server_stop();

        for timer in [
            self.callback_timer.take(),
            self.heart_beat.timer.take(),
            self.unpaired_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.timers.deregister(timer);
        }

        self.primary_accessory = None;
        self.bridged_accessories.clear();

        info!("Accessory server shutdown completed.");
        self.state = ServerState::Idle;
        self.delegate
            .on_event(ServerEvent::UpdatedState(ServerState::Idle));
    }

    // ============================================================================
    // BLE / Thread
    // ============================================================================

    /// Keep BLE running next to Thread.
    pub fn keep_ble_on(&mut self, keep: bool) {
        self.keep_ble_on = keep;
    }

    fn start_transport(&mut self, kind: TransportKind) -> Result<(), HapError> {
        if self.state != ServerState::Running {
            warn!("Cannot start {} transport: Accessory server is not running.", kind);
            return Err(HapError::InvalidState);
        }
        let data = self.advertising_data();
        let slot = self.slot_mut(kind).ok_or(HapError::InvalidState)?;
        if slot.is_running {
            slot.stop_when_disconnected = false;
            if slot.is_stopping {
                debug!("{} transport is stopping. Restarting once stopped.", kind);
                slot.should_start = true;
            }
            return Ok(());
        }

        info!("Accessory server starting {} transport.", kind);
        slot.driver.prepare_start();
        slot.driver.start(&data);
        slot.is_running = true;
        self.setup_info_handle_server_start();
        self.update_advertising();
        Ok(())
    }

    fn stop_transport(&mut self, kind: TransportKind) -> Result<(), HapError> {
        if self.state != ServerState::Running {
            warn!("Cannot stop {} transport: Accessory server is not running.", kind);
            return Err(HapError::InvalidState);
        }
        let slot = self.slot_mut(kind).ok_or(HapError::InvalidState)?;
        slot.should_start = false;
        slot.stop_when_disconnected = false;
        if !slot.is_running || slot.is_stopping {
            return Ok(());
        }
        slot.is_stopping = true;

        info!("Accessory server shutting down {} transport.", kind);
        self.update_advertising();
        let stopped = self
            .slot_mut(kind)
            .map_or(true, |slot| slot.driver.try_stop());
        if stopped {
            self.handle_transport_stopped(kind);
        }
        Ok(())
    }

    pub fn start_ble_transport(&mut self) -> Result<(), HapError> {
        self.start_transport(TransportKind::Ble)
    }

    pub fn stop_ble_transport(&mut self) -> Result<(), HapError> {
        self.stop_transport(TransportKind::Ble)
    }

    /// Stop BLE once the connected controller disconnects.
    pub fn stop_ble_transport_when_disconnected(&mut self) -> Result<(), HapError> {
        let slot = self
            .slot_mut(TransportKind::Ble)
            .ok_or(HapError::InvalidState)?;
        if slot.is_connected {
            debug!("BLE transport will stop once disconnected.");
            slot.stop_when_disconnected = true;
            return Ok(());
        }
        self.stop_transport(TransportKind::Ble)
    }

    pub fn start_thread_transport(&mut self) -> Result<(), HapError> {
        self.start_transport(TransportKind::Thread)
    }

    pub fn stop_thread_transport(&mut self) -> Result<(), HapError> {
        self.stop_transport(TransportKind::Thread)
    }

    /// Report BLE link state changes.
    pub fn handle_ble_connection_state(&mut self, is_connected: bool) {
        let Some(slot) = self.slot_mut(TransportKind::Ble) else {
            return;
        };
        slot.is_connected = is_connected;
        if is_connected || !slot.stop_when_disconnected {
            return;
        }
        slot.stop_when_disconnected = false;
        if let Err(e) = self.stop_transport(TransportKind::Ble) {
            warn!("Deferred BLE stop failed: {}", e);
        }
    }

    /// Report that a transport finished a stop it could not complete in
    /// [`Transport::try_stop`].
    pub fn handle_transport_stopped(&mut self, kind: TransportKind) {
        let Some(slot) = self.slot_mut(kind) else {
            return;
        };
        slot.is_running = false;
        slot.is_stopping = false;
        let restart = std::mem::take(&mut slot.should_start);
        debug!("{} transport stopped.", kind);

        match self.state {
            ServerState::Stopping => self.stop_now(),
            ServerState::Running => {
                self.update_advertising();
                if restart {
                    info!("{} transport restart was pending.", kind);
                    if let Err(e) = self.start_transport(kind) {
                        warn!("Restarting {} transport failed: {}", kind, e);
                    }
                }
            }
            ServerState::Idle => {}
        }
    }

    // ============================================================================
    // State updates and timers
    // ============================================================================

    pub(crate) fn schedule_handle_updated_state(&mut self) {
        if self.callback_timer.is_some() {
            return;
        }
        let now = self.clock.now();
        self.callback_timer = Some(self.timers.register(now, TimerEvent::HandleUpdatedState));
    }

    fn handle_updated_state_timer(&mut self, timer: TimerId) {
        if self.callback_timer != Some(timer) {
            return;
        }
        self.callback_timer = None;
        self.setup_info_handle_state_update();

        let engine_idle = self
            .engine()
            .map_or(false, |e| e.state() == ServerState::Idle);
        if self.state == ServerState::Stopping && engine_idle {
            self.complete_shutdown();
            return;
        }
        let state = self.state();
        self.delegate.on_event(ServerEvent::UpdatedState(state));
    }

    /// Called by a server engine after its state changed.
    pub fn handle_engine_state_changed(&mut self) {
        self.schedule_handle_updated_state();
    }

    /// A pairing was stored. `was_paired` is the pairing state before the write.
    pub(crate) fn handle_pairing_added(&mut self, pairing: &Pairing, was_paired: bool) {
        self.schedule_handle_updated_state();
        self.update_advertising();
        self.update_unpaired_state_timer();
        if !was_paired {
            self.delegate
                .on_event(ServerEvent::PairingStateChanged { paired: true });
        }
        self.delegate.on_event(ServerEvent::ControllerPairingChanged {
            identifier: pairing.identifier.clone(),
            public_key: pairing.public_key,
            paired: true,
        });
    }

    fn remove_all_pairings(&mut self) {
        let removed = pairing::enumerate(&*self.store)
            .unwrap_or_else(|e| fatal("Unable to enumerate pairings", e));
        pairing::remove_all(&mut *self.store)
            .unwrap_or_else(|e| fatal("Unable to remove pairings", e));
        if removed.is_empty() {
            return;
        }
        for (_, pairing) in removed {
            self.delegate.on_event(ServerEvent::ControllerPairingChanged {
                identifier: pairing.identifier,
                public_key: pairing.public_key,
                paired: false,
            });
        }
        self.delegate
            .on_event(ServerEvent::PairingStateChanged { paired: false });
    }

    fn update_unpaired_state_timer(&mut self) {
        let should_run = self.state == ServerState::Running && !self.is_paired();
        match self.unpaired_timer {
            None if should_run => {
                let deadline = self.clock.now() + self.options.unpaired_state_timeout;
                self.unpaired_timer = Some(self.timers.register(deadline, TimerEvent::UnpairedState));
                debug!("Unpaired state timer started.");
            }
            Some(timer) if !should_run => {
                self.timers.deregister(timer);
                self.unpaired_timer = None;
                debug!("Unpaired state timer stopped.");
            }
            _ => {}
        }
    }

    fn handle_unpaired_state_timer(&mut self, timer: TimerId) {
        if self.unpaired_timer != Some(timer) {
            return;
        }
        self.unpaired_timer = None;
        if self.state == ServerState::Running && !self.is_paired() {
            info!(
                "Accessory server stayed unpaired for {} seconds. Stopping.",
                self.options.unpaired_state_timeout.as_secs()
            );
            self.stop();
        }
    }

    fn schedule_heart_beat(&mut self) {
        if let Some(timer) = self.heart_beat.timer.take() {
            self.timers.deregister(timer);
        }
        let jitter = rand::thread_rng().gen_range(0..HEART_BEAT_JITTER.as_secs());
        let deadline = self.clock.now() + HEART_BEAT_INTERVAL + Duration::from_secs(jitter);
        self.heart_beat.timer = Some(self.timers.register(deadline, TimerEvent::HeartBeat));
    }

    fn handle_heart_beat_timer(&mut self, timer: TimerId) {
        if self.heart_beat.timer != Some(timer) {
            return;
        }
        self.heart_beat.timer = None;
        self.heart_beat.value = self.heart_beat.value.wrapping_add(1);
        debug!("Heart beat: {}", self.heart_beat.value);
        self.delegate
            .on_event(ServerEvent::HeartBeat(self.heart_beat.value));
        if self.state == ServerState::Running {
            self.schedule_heart_beat();
        }
    }

    /// Earliest pending deadline, if any.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at the current time.
    pub fn process_timers(&mut self) {
        let now = self.clock.now();
        while let Some((timer, event)) = self.timers.pop_expired(now) {
            match event {
                TimerEvent::HandleUpdatedState => self.handle_updated_state_timer(timer),
                TimerEvent::DeferredStop => self.handle_stop_timer(timer),
                TimerEvent::UnpairedState => self.handle_unpaired_state_timer(timer),
                TimerEvent::HeartBeat => self.handle_heart_beat_timer(timer),
                TimerEvent::SetupInfoRefresh => self.handle_setup_info_refresh_timer(timer),
                TimerEvent::NfcPairingMode => self.handle_nfc_pairing_mode_timer(timer),
            }
        }
    }

    // ============================================================================
    // Sessions
    // ============================================================================

    pub fn create_session(&mut self, transport: TransportKind) -> Session {
        self.next_session_id += 1;
        let session = Session::new(SessionId(self.next_session_id), transport);
        debug!("Session {} created on {} transport.", session.id(), transport);
        session
    }

    /// Tear down a session when its connection closes.
    pub fn release_session(&mut self, mut session: Session) {
        self.reset_pair_setup_for_session(&mut session);
        session.invalidate();
        debug!("Session {} released.", session.id());
        self.delegate
            .on_event(ServerEvent::SessionInvalidated(session.id()));
    }

    /// Invalidate the secure channel of `session` once its keys expired.
    pub fn expire_session_if_needed(&mut self, session: &mut Session) -> bool {
        let now = self.clock.now();
        if !session.is_secure_session_expired(now, self.options.session_key_expiry) {
            return false;
        }
        info!("Session {}: session keys expired.", session.id());
        session.invalidate();
        self.delegate
            .on_event(ServerEvent::SessionInvalidated(session.id()));
        true
    }

    // ============================================================================
    // Ownership proof tokens
    // ============================================================================

    pub fn set_ownership_proof_token_required(&mut self, required: bool) {
        self.ownership.set_required(required);
    }

    /// Issue a token that must accompany the next Pair-Setup M5.
    pub fn generate_ownership_proof_token(&mut self) -> Result<OwnershipProofToken, HapError> {
        if self.is_paired() {
            warn!("Cannot generate ownership proof token: Accessory server is already paired.");
            return Err(HapError::InvalidState);
        }
        let now = self.clock.now();
        self.ownership.generate(now)
    }

    // ============================================================================
    // Events
    // ============================================================================

    fn is_known_accessory(&self, aid: u64) -> bool {
        self.primary_accessory.as_ref().map_or(false, |a| a.aid == aid)
            || self.bridged_accessories.iter().any(|a| a.aid == aid)
    }

    fn raise(&mut self, aid: u64, iid: u64, session: Option<SessionId>) -> Result<(), HapError> {
        if self.state != ServerState::Running {
            return Err(HapError::InvalidState);
        }
        if !self.is_known_accessory(aid) {
            warn!("Event raised for unknown accessory {}.", aid);
            return Err(HapError::InvalidData);
        }
        if let Some(engine) = self.engine_mut() {
            match session {
                Some(session) => engine.raise_event_on_session(aid, iid, session)?,
                None => engine.raise_event(aid, iid)?,
            }
        }
        for slot in self.transports.iter_mut().filter(|s| s.is_running) {
            slot.driver.did_raise_event(aid, iid, session);
        }
        Ok(())
    }

    /// Notify subscribed controllers that a characteristic changed.
    pub fn raise_event(&mut self, aid: u64, iid: u64) -> Result<(), HapError> {
        self.raise(aid, iid, None)
    }

    pub fn raise_event_on_session(
        &mut self,
        aid: u64,
        iid: u64,
        session: &Session,
    ) -> Result<(), HapError> {
        self.raise(aid, iid, Some(session.id()))
    }
}

impl fmt::Debug for AccessoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessoryServer")
            .field("state", &self.state)
            .field("device_id", &self.options.device_id)
            .field("transports", &self.transports.len())
            .finish_non_exhaustive()
    }
}

impl Drop for AccessoryServer {
    fn drop(&mut self) {
        if self.state != ServerState::Idle {
            self.force_stop();
        }
        if let Some(engine) = self.engine_mut() {
            if let Err(e) = engine.deinit() {
                warn!("Server engine deinit failed: {}", e);
            }
        }
    }
}
