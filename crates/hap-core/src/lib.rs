//! # hap-core
//!
//! Core types and error definitions shared across the accessory server crates.
//!
//! This crate provides:
//! - Accessory identity and firmware version types
//! - The accessory description registered with the server
//! - Pairing, status and feature flag bit fields
//! - Common error types

pub mod accessory;
pub mod device;
pub mod error;
pub mod flags;

pub use accessory::{Accessory, Category, Service, ServiceKind};
pub use device::{DeviceId, FirmwareVersion};
pub use error::{CryptoError, Error, HapError, PairingError, ParseError, Result, StorageError};
pub use flags::{PairingFeatureFlags, PairingFlags, StatusFlags};
