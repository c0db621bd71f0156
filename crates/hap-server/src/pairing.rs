//! Persistent controller pairings.
//!
//! Each pairing occupies one key of the pairings domain, holding a
//! fixed-size record:
//!
//! ```text
//! identifier[36] | identifier_len[1] | public_key[32] | permissions[1]
//! ```

use crate::store::{domain, KeyValueStore};
use hap_core::{HapError, Result, StorageError};

/// Maximum controller identifier length.
pub const MAX_IDENTIFIER_LEN: usize = 36;

/// Encoded record size.
pub const RECORD_LEN: usize = MAX_IDENTIFIER_LEN + 1 + 32 + 1;

/// Permission bit marking an admin controller.
pub const PERMISSION_ADMIN: u8 = 0x01;

/// Slot of a pairing within the pairings domain.
pub type PairingIndex = u8;

/// A paired controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub identifier: Vec<u8>,
    pub public_key: [u8; 32],
    pub permissions: u8,
}

impl Pairing {
    pub fn new(identifier: &[u8], public_key: [u8; 32], permissions: u8) -> Result<Self> {
        if identifier.len() > MAX_IDENTIFIER_LEN {
            return Err(HapError::InvalidData.into());
        }
        Ok(Self {
            identifier: identifier.to_vec(),
            public_key,
            permissions,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.permissions & PERMISSION_ADMIN != 0
    }

    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[..self.identifier.len()].copy_from_slice(&self.identifier);
        record[MAX_IDENTIFIER_LEN] = self.identifier.len() as u8;
        record[MAX_IDENTIFIER_LEN + 1..MAX_IDENTIFIER_LEN + 33].copy_from_slice(&self.public_key);
        record[RECORD_LEN - 1] = self.permissions;
        record
    }

    pub fn from_record(index: PairingIndex, record: &[u8]) -> std::result::Result<Self, StorageError> {
        let corrupted = |reason: &str| StorageError::Corrupted {
            domain: domain::PAIRINGS,
            key: index,
            reason: reason.to_string(),
        };

        if record.len() != RECORD_LEN {
            return Err(corrupted("unexpected record length"));
        }
        let id_len = record[MAX_IDENTIFIER_LEN] as usize;
        if id_len > MAX_IDENTIFIER_LEN {
            return Err(corrupted("identifier length out of range"));
        }

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&record[MAX_IDENTIFIER_LEN + 1..MAX_IDENTIFIER_LEN + 33]);

        Ok(Self {
            identifier: record[..id_len].to_vec(),
            public_key,
            permissions: record[RECORD_LEN - 1],
        })
    }
}

/// Load the pairing stored at `index`.
pub fn get(store: &dyn KeyValueStore, index: PairingIndex) -> Result<Option<Pairing>> {
    match store.get(domain::PAIRINGS, index)? {
        Some(record) => Ok(Some(Pairing::from_record(index, &record)?)),
        None => Ok(None),
    }
}

/// All stored pairings in index order.
pub fn enumerate(store: &dyn KeyValueStore) -> Result<Vec<(PairingIndex, Pairing)>> {
    let mut pairings = Vec::new();
    for index in store.enumerate(domain::PAIRINGS)? {
        if let Some(pairing) = get(store, index)? {
            pairings.push((index, pairing));
        }
    }
    Ok(pairings)
}

/// Locate a pairing by controller identifier.
pub fn find(store: &dyn KeyValueStore, identifier: &[u8]) -> Result<Option<(PairingIndex, Pairing)>> {
    Ok(enumerate(store)?
        .into_iter()
        .find(|(_, pairing)| pairing.identifier == identifier))
}

/// Store a pairing, replacing any pairing with the same identifier.
///
/// New pairings take the first free slot below `max_pairings`.
/// Fails with [`HapError::OutOfResources`] when every slot is taken.
pub fn add(
    store: &mut dyn KeyValueStore,
    pairing: &Pairing,
    max_pairings: u8,
) -> Result<PairingIndex> {
    let index = match find(store, &pairing.identifier)? {
        Some((index, _)) => index,
        None => {
            let used = store.enumerate(domain::PAIRINGS)?;
            (0..max_pairings)
                .find(|i| !used.contains(i))
                .ok_or(HapError::OutOfResources)?
        }
    };
    store.set(domain::PAIRINGS, index, &pairing.to_record())?;
    Ok(index)
}

/// Change the permissions of an existing pairing.
pub fn update_permissions(
    store: &mut dyn KeyValueStore,
    identifier: &[u8],
    permissions: u8,
) -> Result<()> {
    let (index, mut pairing) = find(store, identifier)?.ok_or(HapError::InvalidData)?;
    pairing.permissions = permissions;
    store.set(domain::PAIRINGS, index, &pairing.to_record())?;
    Ok(())
}

/// Remove a pairing by identifier. Returns whether one was removed.
pub fn remove(store: &mut dyn KeyValueStore, identifier: &[u8]) -> Result<bool> {
    match find(store, identifier)? {
        Some((index, _)) => {
            store.remove(domain::PAIRINGS, index)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Remove every pairing.
pub fn remove_all(store: &mut dyn KeyValueStore) -> Result<()> {
    store.purge_domain(domain::PAIRINGS)?;
    Ok(())
}

pub fn count(store: &dyn KeyValueStore) -> Result<usize> {
    Ok(store.enumerate(domain::PAIRINGS)?.len())
}

/// Whether any controller is paired.
pub fn is_paired(store: &dyn KeyValueStore) -> Result<bool> {
    Ok(!store.enumerate(domain::PAIRINGS)?.is_empty())
}

/// Whether an admin pairing exists.
pub fn has_admin(store: &dyn KeyValueStore) -> Result<bool> {
    Ok(enumerate(store)?.iter().any(|(_, p)| p.is_admin()))
}
