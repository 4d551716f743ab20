//! Durable identity -> wallet address table.
//!
//! A single JSON file mapping chat identity to checksummed address,
//! loaded once at startup and rewritten on every successful
//! registration. The write goes through a temp file and an atomic
//! rename so a crash mid-write cannot truncate the table.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::chain::types::Address;

/// Errors from loading or persisting the wallet table.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("wallet store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The file exists but is not valid JSON.
    #[error("wallet store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    /// An entry in the file is not a valid address.
    #[error("wallet store holds invalid address for {identity}: {address}")]
    InvalidEntry {
        /// The chat identity of the bad entry.
        identity: String,
        /// The unparseable address string.
        address: String,
    },
}

/// The identity -> address table with its backing file.
pub struct WalletStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Address>>,
}

impl WalletStore {
    /// Load the table from `path`. A missing file is an empty table.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut entries = BTreeMap::new();

        if path.exists() {
            let text = fs::read_to_string(&path)?;
            let raw: BTreeMap<String, String> = serde_json::from_str(&text)?;
            for (identity, address) in raw {
                let parsed = Address::parse_any(&address).map_err(|_| {
                    StoreError::InvalidEntry {
                        identity: identity.clone(),
                        address: address.clone(),
                    }
                })?;
                entries.insert(identity, parsed);
            }
        }

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Look up the registered wallet for a chat identity.
    pub fn get(&self, identity: &str) -> Option<Address> {
        self.lock().get(identity).copied()
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no identities are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Insert a binding and persist the whole table before returning.
    pub fn insert(&self, identity: &str, address: Address) -> Result<(), StoreError> {
        let snapshot = {
            let mut entries = self.lock();
            entries.insert(identity.to_string(), address);
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_checksum()))
                .collect::<BTreeMap<_, _>>()
        };
        self.flush(&snapshot)
    }

    fn flush(&self, snapshot: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(snapshot)?;
        let tmp = temp_path(&self.path);
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Address>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

// =============================================================================
// TESTS
// =============================================================================
