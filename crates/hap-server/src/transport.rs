//! Interfaces between the server core and its transports.

use crate::server::ServerState;
use crate::session::SessionId;
use hap_core::{Accessory, Category, DeviceId, HapError, PairingFeatureFlags, StatusFlags};
use std::fmt;

/// Transport a session or driver belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// HAP over TCP/HTTP.
    Ip,
    /// HAP over Bluetooth LE GATT.
    Ble,
    /// HAP over CoAP on a Thread network.
    Thread,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ip => f.write_str("IP"),
            TransportKind::Ble => f.write_str("BLE"),
            TransportKind::Thread => f.write_str("Thread"),
        }
    }
}

/// Snapshot of the values transports advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingData {
    pub device_id: DeviceId,
    pub name: String,
    pub model: String,
    pub category: Category,
    /// Configuration number, 16-bit form.
    pub config_number: u16,
    pub status_flags: StatusFlags,
    pub feature_flags: PairingFeatureFlags,
    pub setup_hash: Option<[u8; 4]>,
    /// False once the server is stopping.
    pub is_discoverable: bool,
}

/// Connection-level server engine exposed by IP transports.
///
/// An engine takes over shutdown: after [`ServerEngine::stop`] it winds
/// down its connections and reports [`ServerState::Idle`], then calls
/// [`crate::AccessoryServer::handle_engine_state_changed`], which completes
/// the shutdown.
pub trait ServerEngine {
    fn init(&mut self) {}

    fn deinit(&mut self) -> Result<(), HapError> {
        Ok(())
    }

    fn state(&self) -> ServerState;

    fn start(&mut self);

    fn stop(&mut self) -> Result<(), HapError>;

    fn raise_event(&mut self, _aid: u64, _iid: u64) -> Result<(), HapError> {
        Ok(())
    }

    fn raise_event_on_session(
        &mut self,
        _aid: u64,
        _iid: u64,
        _session: SessionId,
    ) -> Result<(), HapError> {
        Ok(())
    }
}

/// A transport driver.
///
/// Only [`Transport::kind`] and [`Transport::start`] are mandatory.
pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Check transport-specific requirements of an accessory.
    fn validate_accessory(&self, _accessory: &Accessory) -> Result<(), HapError> {
        Ok(())
    }

    fn prepare_start(&mut self) {}

    /// Called once the accessory has been registered.
    fn will_start(&mut self, _accessory: &Accessory) {}

    fn start(&mut self, advertising: &AdvertisingData);

    fn prepare_stop(&mut self) {}

    /// Begin stopping. Returns whether the transport stopped immediately.
    ///
    /// A transport that returns `false` must later report completion via
    /// [`crate::AccessoryServer::handle_transport_stopped`].
    fn try_stop(&mut self) -> bool {
        true
    }

    fn update_advertising_data(&mut self, _advertising: &AdvertisingData) {}

    fn did_raise_event(&mut self, _aid: u64, _iid: u64, _session: Option<SessionId>) {}

    fn server_engine(&self) -> Option<&dyn ServerEngine> {
        None
    }

    fn server_engine_mut(&mut self) -> Option<&mut dyn ServerEngine> {
        None
    }
}
