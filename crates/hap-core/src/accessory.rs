//! Accessory description consumed by the server core.
//!
//! Only identity, category and service-type information is modelled here;
//! characteristic dispatch lives with the transports.

use crate::device::FirmwareVersion;
use crate::error::ParseError;

/// Accessory category advertised to controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Category(pub u16);

impl Category {
    pub const BRIDGED_ACCESSORY: Category = Category(0);
    pub const OTHER: Category = Category(1);
    pub const BRIDGES: Category = Category(2);
    pub const FANS: Category = Category(3);
    pub const GARAGE_DOOR_OPENERS: Category = Category(4);
    pub const LIGHTING: Category = Category(5);
    pub const LOCKS: Category = Category(6);
    pub const OUTLETS: Category = Category(7);
    pub const SWITCHES: Category = Category(8);
    pub const THERMOSTATS: Category = Category(9);
    pub const SENSORS: Category = Category(10);
    pub const SECURITY_SYSTEMS: Category = Category(11);
    pub const DOORS: Category = Category(12);
    pub const WINDOWS: Category = Category(13);
    pub const WINDOW_COVERINGS: Category = Category(14);
    pub const PROGRAMMABLE_SWITCHES: Category = Category(15);
    pub const RANGE_EXTENDERS: Category = Category(16);
    pub const IP_CAMERAS: Category = Category(17);
    pub const VIDEO_DOORBELLS: Category = Category(18);
    pub const AIR_PURIFIERS: Category = Category(19);
    pub const HEATERS: Category = Category(20);
    pub const AIR_CONDITIONERS: Category = Category(21);
    pub const HUMIDIFIERS: Category = Category(22);
    pub const DEHUMIDIFIERS: Category = Category(23);
    pub const SPRINKLERS: Category = Category(28);
    pub const FAUCETS: Category = Category(29);
    pub const SHOWER_SYSTEMS: Category = Category(30);
    pub const REMOTES: Category = Category(32);
    pub const WIFI_ROUTERS: Category = Category(33);

    /// The setup payload encodes categories in 8 bits.
    pub fn payload_bits(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

/// Service kinds the core needs to recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    AccessoryInformation,
    ProtocolInformation,
    Pairing,
    /// Any other service, identified by its short UUID.
    Other(u32),
}

/// A service attached to an accessory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub iid: u64,
    pub kind: ServiceKind,
}

impl Service {
    pub fn new(iid: u64, kind: ServiceKind) -> Self {
        Self { iid, kind }
    }
}

/// Accessory description registered with the server at start.
#[derive(Debug, Clone)]
pub struct Accessory {
    /// Accessory instance ID. The primary accessory uses 1.
    pub aid: u64,
    pub category: Category,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub hardware_version: Option<String>,
    /// Eight bytes assigned by the certification program, if any.
    pub product_data: Option<[u8; 8]>,
    pub services: Vec<Service>,
}

/// Longest name the server will advertise.
pub const MAX_NAME_LEN: usize = 64;

impl Accessory {
    pub const PRIMARY_AID: u64 = 1;

    /// Parsed firmware version.
    pub fn firmware_version(&self) -> Result<FirmwareVersion, ParseError> {
        FirmwareVersion::parse(&self.firmware_version)
    }

    pub fn has_service(&self, kind: &ServiceKind) -> bool {
        self.services.iter().any(|s| &s.kind == kind)
    }

    /// Check the description of a primary accessory.
    pub fn validate_primary(&self) -> Result<(), ParseError> {
        if self.aid != Self::PRIMARY_AID {
            return Err(ParseError::InvalidValue(format!(
                "primary accessory must have aid {}, got {}",
                Self::PRIMARY_AID,
                self.aid
            )));
        }
        if self.category == Category::BRIDGED_ACCESSORY {
            return Err(ParseError::InvalidValue(
                "primary accessory cannot use the bridged accessory category".to_string(),
            ));
        }
        self.validate_common()
    }

    /// Check the description of an accessory behind a bridge.
    pub fn validate_bridged(&self) -> Result<(), ParseError> {
        if self.aid == Self::PRIMARY_AID || self.aid == 0 {
            return Err(ParseError::InvalidValue(format!(
                "bridged accessory has reserved aid {}",
                self.aid
            )));
        }
        if self.category != Category::BRIDGED_ACCESSORY {
            return Err(ParseError::InvalidValue(format!(
                "bridged accessory {} must use the bridged accessory category",
                self.aid
            )));
        }
        self.validate_common()
    }

    fn validate_common(&self) -> Result<(), ParseError> {
        if self.name.is_empty() {
            return Err(ParseError::MissingField("name"));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(ParseError::InvalidValue(format!(
                "name exceeds {} bytes",
                MAX_NAME_LEN
            )));
        }
        if self.manufacturer.is_empty() {
            return Err(ParseError::MissingField("manufacturer"));
        }
        if self.model.is_empty() {
            return Err(ParseError::MissingField("model"));
        }
        if self.serial_number.is_empty() {
            return Err(ParseError::MissingField("serial_number"));
        }
        self.firmware_version()?;
        if let Some(hw) = &self.hardware_version {
            FirmwareVersion::parse(hw)?;
        }

        let mut iids: Vec<u64> = self.services.iter().map(|s| s.iid).collect();
        iids.sort_unstable();
        if iids.windows(2).any(|w| w[0] == w[1]) || iids.first() == Some(&0) {
            return Err(ParseError::InvalidValue(format!(
                "accessory {} has duplicate or zero service instance IDs",
                self.aid
            )));
        }
        Ok(())
    }
}
