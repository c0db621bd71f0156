//! Persistent key-value store used by the server core.
//!
//! Entries are small binary blobs addressed by a one-byte domain and a
//! one-byte key. Backends report failures as [`StorageError`]; inside the
//! server lifecycle those failures are fatal.

use hap_core::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Store domains.
pub mod domain {
    /// Store schema bookkeeping.
    pub const VERSION: u8 = 0x00;
    /// Accessory configuration and identity.
    pub const CONFIGURATION: u8 = 0x90;
    /// One entry per paired controller.
    pub const PAIRINGS: u8 = 0xA0;
}

/// Keys within [`domain::VERSION`] and [`domain::CONFIGURATION`].
pub mod key {
    pub const SCHEMA_VERSION: u8 = 0x00;

    pub const FIRMWARE_VERSION: u8 = 0x10;
    pub const CONFIGURATION_NUMBER: u8 = 0x20;
    pub const LTSK: u8 = 0x21;
    pub const UNSUCCESSFUL_AUTH_ATTEMPTS: u8 = 0x22;
    pub const BLE_BROADCAST_PARAMETERS: u8 = 0x24;
}

/// Schema written by this version of the server.
pub const SCHEMA_VERSION: u8 = 1;

/// Domain/key addressed byte store.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore {
    /// Fetch an entry, `None` if absent.
    fn get(&self, domain: u8, key: u8) -> Result<Option<Vec<u8>>, StorageError>;

    /// Create or replace an entry.
    fn set(&mut self, domain: u8, key: u8, value: &[u8]) -> Result<(), StorageError>;

    /// Remove an entry. Removing an absent entry succeeds.
    fn remove(&mut self, domain: u8, key: u8) -> Result<(), StorageError>;

    /// List the keys present in a domain, in ascending order.
    fn enumerate(&self, domain: u8) -> Result<Vec<u8>, StorageError>;

    /// Remove every entry of a domain.
    fn purge_domain(&mut self, domain: u8) -> Result<(), StorageError>;
}

/// Volatile store, mostly useful for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<(u8, u8), Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, domain: u8, key: u8) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(&(domain, key)).cloned())
    }

    fn set(&mut self, domain: u8, key: u8, value: &[u8]) -> Result<(), StorageError> {
        self.entries.insert((domain, key), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, domain: u8, key: u8) -> Result<(), StorageError> {
        self.entries.remove(&(domain, key));
        Ok(())
    }

    fn enumerate(&self, domain: u8) -> Result<Vec<u8>, StorageError> {
        Ok(self
            .entries
            .range((domain, 0)..=(domain, u8::MAX))
            .map(|((_, k), _)| *k)
            .collect())
    }

    fn purge_domain(&mut self, domain: u8) -> Result<(), StorageError> {
        self.entries.retain(|(d, _), _| *d != domain);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct StoreFile {
    /// "dd.kk" (hex domain and key) to hex-encoded value.
    entries: BTreeMap<String, String>,
}

/// JSON file backed store, written through on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: MemoryStore,
}

impl FileStore {
    /// Open a store file, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut cache = MemoryStore::new();

        match fs::read_to_string(&path) {
            Ok(contents) => {
                let file: StoreFile = serde_json::from_str(&contents)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                for (name, value) in file.entries {
                    let (domain, key) = parse_entry_name(&name)?;
                    let value = hex::decode(&value).map_err(|e| StorageError::Corrupted {
                        domain,
                        key,
                        reason: e.to_string(),
                    })?;
                    cache.entries.insert((domain, key), value);
                }
                debug!("Loaded {} entries from {}", cache.len(), path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Creating new key-value store at {}", path.display());
            }
            Err(e) => return Err(StorageError::Io(e.to_string())),
        }

        Ok(Self { path, cache })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let file = StoreFile {
            entries: self
                .cache
                .entries
                .iter()
                .map(|((d, k), v)| (format!("{:02x}.{:02x}", d, k), hex::encode(v)))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| StorageError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::Io(e.to_string()))
    }
}

fn parse_entry_name(name: &str) -> Result<(u8, u8), StorageError> {
    let corrupted = || StorageError::Serialization(format!("invalid entry name {:?}", name));
    let (d, k) = name.split_once('.').ok_or_else(corrupted)?;
    let domain = u8::from_str_radix(d, 16).map_err(|_| corrupted())?;
    let key = u8::from_str_radix(k, 16).map_err(|_| corrupted())?;
    Ok((domain, key))
}

impl KeyValueStore for FileStore {
    fn get(&self, domain: u8, key: u8) -> Result<Option<Vec<u8>>, StorageError> {
        self.cache.get(domain, key)
    }

    fn set(&mut self, domain: u8, key: u8, value: &[u8]) -> Result<(), StorageError> {
        self.cache.set(domain, key, value)?;
        self.flush()
    }

    fn remove(&mut self, domain: u8, key: u8) -> Result<(), StorageError> {
        if self.cache.entries.remove(&(domain, key)).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn enumerate(&self, domain: u8) -> Result<Vec<u8>, StorageError> {
        self.cache.enumerate(domain)
    }

    fn purge_domain(&mut self, domain: u8) -> Result<(), StorageError> {
        self.cache.purge_domain(domain)?;
        self.flush()
    }
}

/// Whether the store was written by a compatible schema.
pub fn is_compatible(store: &dyn KeyValueStore) -> Result<bool, StorageError> {
    Ok(match store.get(domain::VERSION, key::SCHEMA_VERSION)? {
        None => true,
        Some(v) if v.len() == 1 => v[0] <= SCHEMA_VERSION,
        Some(_) => false,
    })
}

/// Record the current schema version.
pub fn stamp_schema_version(store: &mut dyn KeyValueStore) -> Result<(), StorageError> {
    store.set(domain::VERSION, key::SCHEMA_VERSION, &[SCHEMA_VERSION])
}

/// Log and abort on an unrecoverable store failure.
pub(crate) fn fatal(context: &str, err: impl fmt::Display) -> ! {
    error!("{}: {}", context, err);
    panic!("{}: {}", context, err);
}

/// Store accessors for paths where failure is fatal.
pub(crate) trait StoreExt {
    fn must_get(&self, domain: u8, key: u8) -> Option<Vec<u8>>;
    fn must_set(&mut self, domain: u8, key: u8, value: &[u8]);
    fn must_remove(&mut self, domain: u8, key: u8);
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {
    fn must_get(&self, domain: u8, key: u8) -> Option<Vec<u8>> {
        self.get(domain, key)
            .unwrap_or_else(|e| fatal("Key-value store read failed", e))
    }

    fn must_set(&mut self, domain: u8, key: u8, value: &[u8]) {
        if let Err(e) = self.set(domain, key, value) {
            fatal("Key-value store write failed", e);
        }
    }

    fn must_remove(&mut self, domain: u8, key: u8) {
        if let Err(e) = self.remove(domain, key) {
            fatal("Key-value store remove failed", e);
        }
    }
}
