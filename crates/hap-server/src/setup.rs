//! Setup codes, setup IDs and setup payloads.

use hap_core::{Category, DeviceId, ParseError};
use hap_crypto::srp;
use rand::Rng;
use sha2::{Digest, Sha512};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An 8-digit setup code formatted as `XXX-XX-XXX`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SetupCode(String);

impl SetupCode {
    pub const LEN: usize = 10;

    /// Parse and validate a setup code.
    ///
    /// Trivial codes (all digits equal, `123-45-678`, `876-54-321`) are rejected.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if !Self::is_valid(s) {
            return Err(ParseError::InvalidValue("setup code".to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn is_valid(s: &str) -> bool {
        let bytes = s.as_bytes();
        if bytes.len() != Self::LEN {
            return false;
        }

        let mut digits = Vec::with_capacity(8);
        for (i, c) in bytes.iter().enumerate() {
            if i == 3 || i == 6 {
                if *c != b'-' {
                    return false;
                }
            } else if c.is_ascii_digit() {
                digits.push(*c);
            } else {
                return false;
            }
        }

        let all_equal = digits.iter().all(|d| *d == digits[0]);
        let ascending = digits[0] == b'1' && digits.windows(2).all(|w| w[1] == w[0] + 1);
        let descending = digits[0] == b'8' && digits.windows(2).all(|w| w[0] == w[1] + 1);
        !(all_equal || ascending || descending)
    }

    /// Generate a random valid setup code.
    pub fn generate_random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let d: Vec<char> = (0..8)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect();
            let candidate = format!(
                "{}{}{}-{}{}-{}{}{}",
                d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
            );
            if Self::is_valid(&candidate) {
                return Self(candidate);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The eight digits as an integer.
    pub fn digits(&self) -> u32 {
        self.0
            .bytes()
            .filter(u8::is_ascii_digit)
            .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'))
    }
}

impl fmt::Debug for SetupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetupCode(***-**-***)")
    }
}

/// A 4-character setup identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupId(String);

impl SetupId {
    pub const LEN: usize = 4;

    const ALPHABET: &'static [u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.len() != Self::LEN || !s.bytes().all(|c| Self::ALPHABET.contains(&c)) {
            return Err(ParseError::InvalidValue("setup ID".to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn generate_random() -> Self {
        let mut rng = rand::thread_rng();
        Self(
            (0..Self::LEN)
                .map(|_| char::from(Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())]))
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// SRP salt and verifier derived from a setup code.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SetupInfo {
    pub salt: [u8; srp::SALT_BYTES],
    pub verifier: [u8; srp::N_BYTES],
}

impl SetupInfo {
    /// Derive setup info for a code using a fresh random salt.
    pub fn from_code(code: &SetupCode) -> Self {
        let salt = srp::generate_salt();
        Self::from_code_with_salt(code, salt)
    }

    pub fn from_code_with_salt(code: &SetupCode, salt: [u8; srp::SALT_BYTES]) -> Self {
        let verifier = srp::verifier(&salt, srp::PAIR_SETUP_USERNAME, code.as_str().as_bytes());
        Self { salt, verifier }
    }
}

impl fmt::Debug for SetupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupInfo").finish_non_exhaustive()
    }
}

/// Transport and pairing bits encoded in a setup payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupPayloadFlags {
    pub is_paired: bool,
    pub ip_supported: bool,
    pub ble_supported: bool,
    pub wac_supported: bool,
    pub thread_supported: bool,
}

/// An `X-HM://` setup payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPayload(String);

impl SetupPayload {
    const PREFIX: &'static str = "X-HM://";
    const VERSION: u64 = 0;
    const ENCODED_DIGITS: usize = 9;

    /// Build a payload. Without a setup code the payload is not pairable.
    pub fn new(
        code: Option<&SetupCode>,
        setup_id: Option<&SetupId>,
        flags: SetupPayloadFlags,
        category: Category,
    ) -> Self {
        let mut value: u64 = Self::VERSION << 43;
        if flags.thread_supported {
            value |= 1 << 39;
        }
        value |= u64::from(category.payload_bits()) << 31;
        if flags.wac_supported {
            value |= 1 << 30;
        }
        if flags.ble_supported {
            value |= 1 << 29;
        }
        if flags.ip_supported {
            value |= 1 << 28;
        }
        if flags.is_paired {
            value |= 1 << 27;
        }
        if let Some(code) = code {
            value |= u64::from(code.digits()) & 0x7FF_FFFF;
        }

        let mut encoded = [b'0'; Self::ENCODED_DIGITS];
        for slot in encoded.iter_mut().rev() {
            *slot = SetupId::ALPHABET[(value % 36) as usize];
            value /= 36;
        }

        let mut payload = String::with_capacity(Self::PREFIX.len() + Self::ENCODED_DIGITS + 4);
        payload.push_str(Self::PREFIX);
        payload.extend(encoded.iter().map(|c| char::from(*c)));
        payload.push_str(setup_id.map_or("0000", SetupId::as_str));
        Self(payload)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SetupPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First four bytes of SHA-512(setup ID || device ID string).
pub fn setup_hash(setup_id: &SetupId, device_id: &DeviceId) -> [u8; 4] {
    let mut hasher = Sha512::new();
    hasher.update(setup_id.as_str().as_bytes());
    hasher.update(device_id.to_mac_string().as_bytes());
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Source of provisioned setup information.
#[cfg_attr(test, mockall::automock)]
pub trait AccessorySetup {
    /// Static SRP salt and verifier, for accessories with a printed code.
    fn load_setup_info(&mut self) -> Option<SetupInfo>;

    /// Static setup code, needed to program an NFC tag.
    fn load_setup_code(&mut self) -> Option<SetupCode>;

    fn load_setup_id(&mut self) -> Option<SetupId>;
}

/// A display able to show a setup code or QR payload.
pub trait SetupDisplay {
    /// Show the given payload and code. `None` clears the display.
    fn update_setup_payload(&mut self, payload: Option<&SetupPayload>, code: Option<&SetupCode>);

    fn handle_start_pairing(&mut self);

    fn handle_stop_pairing(&mut self);
}

/// A programmable NFC tag.
pub trait SetupNfc {
    fn update_setup_payload(&mut self, payload: &SetupPayload, is_pairable: bool);
}

/// Setup provider backed by fixed values.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessorySetup {
    code: Option<SetupCode>,
    setup_id: Option<SetupId>,
    info: Option<SetupInfo>,
}

impl StaticAccessorySetup {
    /// Provision a code, deriving the SRP verifier once.
    pub fn new(code: SetupCode, setup_id: Option<SetupId>) -> Self {
        let info = SetupInfo::from_code(&code);
        Self {
            code: Some(code),
            setup_id,
            info: Some(info),
        }
    }

    /// Provider for accessories that only show dynamic codes.
    pub fn dynamic(setup_id: Option<SetupId>) -> Self {
        Self {
            code: None,
            setup_id,
            info: None,
        }
    }
}

impl AccessorySetup for StaticAccessorySetup {
    fn load_setup_info(&mut self) -> Option<SetupInfo> {
        self.info.clone()
    }

    fn load_setup_code(&mut self) -> Option<SetupCode> {
        self.code.clone()
    }

    fn load_setup_id(&mut self) -> Option<SetupId> {
        self.setup_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod setup_code {
        use super::*;

        #[test]
        fn accepts_well_formed_codes() {
            let code = SetupCode::parse("031-45-154").unwrap();
            assert_eq!(code.as_str(), "031-45-154");
            assert_eq!(code.digits(), 3_145_154);
        }

        #[test]
        fn rejects_malformed_codes() {
            for s in ["", "03145154", "031-45-15", "031_45-154", "03a-45-154", "031-45-1544"] {
                assert!(SetupCode::parse(s).is_err(), "{:?}", s);
            }
        }

        #[test]
        fn rejects_trivial_codes() {
            for d in b'0'..=b'9' {
                let c = char::from(d);
                let s = format!("{c}{c}{c}-{c}{c}-{c}{c}{c}");
                assert!(!SetupCode::is_valid(&s), "{}", s);
            }
            assert!(!SetupCode::is_valid("123-45-678"));
            assert!(!SetupCode::is_valid("876-54-321"));
            assert!(SetupCode::is_valid("234-56-789"));
            assert!(SetupCode::is_valid("765-43-210"));
        }

        #[test]
        fn random_codes_are_valid() {
            for _ in 0..100 {
                let code = SetupCode::generate_random();
                assert!(SetupCode::is_valid(code.as_str()));
            }
        }

        #[test]
        fn debug_hides_digits() {
            let code = SetupCode::parse("031-45-154").unwrap();
            assert!(!format!("{:?}", code).contains("031"));
        }
    }

    mod setup_id {
        use super::*;

        #[test]
        fn validates_alphabet_and_length() {
            assert!(SetupId::parse("7OSX").is_ok());
            assert!(SetupId::parse("7osx").is_err());
            assert!(SetupId::parse("7OS").is_err());
            assert!(SetupId::parse("7OSX1").is_err());
            assert!(SetupId::parse(&SetupId::generate_random().0).is_ok());
        }
    }

    mod setup_payload {
        use super::*;

        #[test]
        fn encodes_known_payload() {
            let code = SetupCode::parse("518-08-582").unwrap();
            let id = SetupId::parse("1QJ8").unwrap();
            let flags = SetupPayloadFlags {
                ip_supported: true,
                ..Default::default()
            };
            let payload = SetupPayload::new(Some(&code), Some(&id), flags, Category::BRIDGES);
            assert_eq!(payload.as_str(), "X-HM://0024BRZUU1QJ8");
        }

        #[test]
        fn non_pairable_payload_omits_code_and_id() {
            let flags = SetupPayloadFlags {
                is_paired: true,
                ble_supported: true,
                ..Default::default()
            };
            let payload = SetupPayload::new(None, None, flags, Category::LIGHTING);
            let s = payload.as_str();
            assert_eq!(s.len(), 7 + 9 + 4);
            assert!(s.ends_with("0000"));

            let value = u64::from_str_radix(&s[7..16], 36).unwrap();
            assert_eq!(value & 0x7FF_FFFF, 0);
            assert_ne!(value & (1 << 27), 0);
            assert_ne!(value & (1 << 29), 0);
            assert_eq!((value >> 31) & 0xFF, 5);
        }

        #[test]
        fn setup_hash_is_stable() {
            let id = SetupId::parse("7OSX").unwrap();
            let device = DeviceId([0xC8, 0xD8, 0x3D, 0x0C, 0x9A, 0x22]);
            let hash = setup_hash(&id, &device);
            assert_eq!(hash, setup_hash(&id, &device));

            let other = DeviceId([0xC8, 0xD8, 0x3D, 0x0C, 0x9A, 0x23]);
            assert_ne!(hash, setup_hash(&id, &other));
        }
    }

    mod static_setup {
        use super::*;

        #[test]
        fn verifier_matches_code() {
            let code = SetupCode::parse("031-45-154").unwrap();
            let mut setup = StaticAccessorySetup::new(code.clone(), None);
            let info = setup.load_setup_info().unwrap();
            let expected = srp::verifier(&info.salt, srp::PAIR_SETUP_USERNAME, b"031-45-154");
            assert_eq!(info.verifier, expected);
            assert_eq!(setup.load_setup_code(), Some(code));
            assert!(setup.load_setup_id().is_none());
        }

        #[test]
        fn dynamic_provider_has_no_code() {
            let mut setup = StaticAccessorySetup::dynamic(Some(SetupId::parse("ABCD").unwrap()));
            assert!(setup.load_setup_info().is_none());
            assert!(setup.load_setup_code().is_none());
            assert!(setup.load_setup_id().is_some());
        }
    }
}
