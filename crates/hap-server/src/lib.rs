//! # hap-server
//!
//! HomeKit accessory server core.
//!
//! This crate provides:
//! - The accessory server lifecycle across IP, BLE and Thread transports
//! - Pair-Setup (SRP-6a with the accessory setup code)
//! - Persistent pairings and configuration in a key-value store
//! - Dynamic and static setup codes, QR/NFC setup payloads
//!
//! ## Example
//!
//! ```ignore
//! use hap_server::{AccessoryServer, MemoryStore, StaticAccessorySetup};
//!
//! let mut server = AccessoryServer::builder()
//!     .key_value_store(MemoryStore::new())
//!     .accessory_setup(StaticAccessorySetup::new(code, None))
//!     .transport(my_ip_transport)
//!     .build()?;
//! server.start(accessory)?;
//!
//! loop {
//!     // Sleep until server.next_timer_deadline(), then:
//!     server.process_timers();
//! }
//! ```

mod config;
mod delegate;
mod ownership;
mod pair_setup;
pub mod pairing;
mod server;
mod session;
pub mod setup;
mod setup_info;
pub mod store;
pub mod timer;
mod transport;

pub use config::{MfiAuth, ServerBuilder, ServerOptions};
pub use delegate::{CallbackDelegate, NoOpDelegate, ServerDelegate, ServerEvent};
pub use ownership::OwnershipProofToken;
pub use pair_setup::MAX_AUTH_ATTEMPTS;
pub use server::{AccessoryServer, ServerState};
pub use session::{PairSetupProgress, PairingMethod, SecureSession, Session, SessionId};
pub use setup::{
    AccessorySetup, SetupCode, SetupDisplay, SetupId, SetupInfo, SetupNfc, SetupPayload,
    StaticAccessorySetup,
};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use timer::{Clock, ManualClock, SystemClock};
pub use transport::{AdvertisingData, ServerEngine, Transport, TransportKind};

// Re-export commonly used types
pub use hap_core::{Accessory, Category, DeviceId, Error, FirmwareVersion, HapError, PairingError, Result};
