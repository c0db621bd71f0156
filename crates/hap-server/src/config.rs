//! Server options and builder.

use crate::delegate::{NoOpDelegate, ServerDelegate};
use crate::server::AccessoryServer;
use crate::setup::{AccessorySetup, SetupDisplay, SetupNfc};
use crate::store::KeyValueStore;
use crate::timer::{Clock, SystemClock};
use crate::transport::Transport;
use hap_core::{DeviceId, HapError};
use std::time::Duration;

/// Apple authentication coprocessor or software token provider.
#[cfg_attr(test, mockall::automock)]
pub trait MfiAuth {
    fn is_available(&self) -> bool;

    fn supports_token_auth(&self) -> bool {
        false
    }

    /// Sign a 32-byte challenge.
    fn create_signature(&mut self, challenge: &[u8]) -> Result<Vec<u8>, HapError>;

    fn copy_certificate(&mut self) -> Result<Vec<u8>, HapError>;
}

/// Options fixed at server creation.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub device_id: DeviceId,
    /// Pairing slots, at least 1.
    pub max_pairings: u8,
    /// Lifetime of secure sessions. `None` keeps them forever.
    pub session_key_expiry: Option<Duration>,
    /// After this long a stalled Pair-Setup claim may be taken over.
    pub pair_setup_timeout: Duration,
    /// The server stops if it stays unpaired this long.
    pub unpaired_state_timeout: Duration,
    pub ownership_token_lifetime: Duration,
    pub setup_code_refresh_interval: Duration,
    pub nfc_pairing_mode_duration: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            device_id: DeviceId::random(),
            max_pairings: MIN_PAIRINGS,
            session_key_expiry: None,
            pair_setup_timeout: Duration::from_secs(30),
            unpaired_state_timeout: Duration::from_secs(10 * 60),
            ownership_token_lifetime: Duration::from_secs(10 * 60),
            setup_code_refresh_interval: Duration::from_secs(5 * 60),
            nfc_pairing_mode_duration: Duration::from_secs(5 * 60),
        }
    }
}

/// Smallest pairing capacity a server may be built with.
pub const MIN_PAIRINGS: u8 = 16;

/// Builder for configuring an [`AccessoryServer`].
pub struct ServerBuilder {
    pub(crate) options: ServerOptions,
    pub(crate) store: Option<Box<dyn KeyValueStore>>,
    pub(crate) transports: Vec<Box<dyn Transport>>,
    pub(crate) delegate: Box<dyn ServerDelegate>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) accessory_setup: Option<Box<dyn AccessorySetup>>,
    pub(crate) display: Option<Box<dyn SetupDisplay>>,
    pub(crate) nfc: Option<Box<dyn SetupNfc>>,
    pub(crate) mfi: Option<Box<dyn MfiAuth>>,
}

impl ServerBuilder {
    /// Create new builder with defaults.
    pub fn new() -> Self {
        Self {
            options: ServerOptions::default(),
            store: None,
            transports: Vec::new(),
            delegate: Box::new(NoOpDelegate),
            clock: Box::new(SystemClock),
            accessory_setup: None,
            display: None,
            nfc: None,
            mfi: None,
        }
    }

    /// Replace all options at once.
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key_value_store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Add a transport. At most one per kind.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    pub fn delegate(mut self, delegate: impl ServerDelegate + 'static) -> Self {
        self.delegate = Box::new(delegate);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn accessory_setup(mut self, setup: impl AccessorySetup + 'static) -> Self {
        self.accessory_setup = Some(Box::new(setup));
        self
    }

    /// Attach a display. Accessories with a display use dynamic setup codes.
    pub fn setup_display(mut self, display: impl SetupDisplay + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    pub fn setup_nfc(mut self, nfc: impl SetupNfc + 'static) -> Self {
        self.nfc = Some(Box::new(nfc));
        self
    }

    pub fn mfi_auth(mut self, mfi: impl MfiAuth + 'static) -> Self {
        self.mfi = Some(Box::new(mfi));
        self
    }

    pub fn device_id(mut self, device_id: DeviceId) -> Self {
        self.options.device_id = device_id;
        self
    }

    pub fn max_pairings(mut self, max_pairings: u8) -> Self {
        self.options.max_pairings = max_pairings;
        self
    }

    pub fn session_key_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.options.session_key_expiry = expiry;
        self
    }

    pub fn pair_setup_timeout(mut self, timeout: Duration) -> Self {
        self.options.pair_setup_timeout = timeout;
        self
    }

    pub fn unpaired_state_timeout(mut self, timeout: Duration) -> Self {
        self.options.unpaired_state_timeout = timeout;
        self
    }

    /// Build the server.
    pub fn build(self) -> Result<AccessoryServer, HapError> {
        if self.transports.is_empty() || self.options.max_pairings < MIN_PAIRINGS {
            return Err(HapError::InvalidData);
        }
        for (i, transport) in self.transports.iter().enumerate() {
            if self.transports[..i]
                .iter()
                .any(|t| t.kind() == transport.kind())
            {
                return Err(HapError::InvalidData);
            }
        }
        AccessoryServer::from_builder(self)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
