//! Persistent friendly names for tagged bottles.
//!
//! Names are kept in a flat key-value namespace. Keys only carry the first
//! eight hex digits of the EPC (`name_30751FEB`) while the value keeps the full
//! EPC next to the name (`30751FEB705C5904E3D50D70|Copper 45um`):
//!
//! - a lookup only answers when the stored EPC matches, so a different tag that
//!   shares the prefix reads back as unnamed;
//! - a rename of such a tag lands in the same slot and replaces the other
//!   tag's name.
//!
//! Two bottles whose EPCs share a prefix therefore cannot both be named.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::types::TrackerError;

const KEY_PREFIX: &str = "name_";
const KEY_EPC_CHARS: usize = 8;
const SEPARATOR: char = '|';

/// Key-value service holding bottle names
pub trait NameStore {
    /// Name stored for `epc`, if any
    fn get(&self, epc: &str) -> Option<String>;

    /// Persist `name` for `epc`
    fn put(&mut self, epc: &str, name: &str) -> Result<(), TrackerError>;
}

impl<S: NameStore + ?Sized> NameStore for Box<S> {
    fn get(&self, epc: &str) -> Option<String> {
        (**self).get(epc)
    }

    fn put(&mut self, epc: &str, name: &str) -> Result<(), TrackerError> {
        (**self).put(epc, name)
    }
}

/// Storage key for `epc`
pub fn storage_key(epc: &str) -> String {
    let prefix: String = epc.chars().take(KEY_EPC_CHARS).collect();
    format!("{}{}", KEY_PREFIX, prefix)
}

fn encode_value(epc: &str, name: &str) -> String {
    format!("{}{}{}", epc, SEPARATOR, name)
}

fn decode_value(stored: &str, epc: &str) -> Option<String> {
    if stored.is_empty() || !stored.starts_with(epc) {
        return None;
    }
    match stored.find(SEPARATOR) {
        Some(pos) if pos > 0 => Some(stored[pos + 1..].to_string()),
        _ => None,
    }
}

/// Volatile store, used in tests and when no names file is configured
#[derive(Debug, Default, Clone)]
pub struct MemoryNameStore {
    entries: BTreeMap<String, String>,
}

impl MemoryNameStore {
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

impl NameStore for MemoryNameStore {
    fn get(&self, epc: &str) -> Option<String> {
        self.entries
            .get(&storage_key(epc))
            .and_then(|stored| decode_value(stored, epc))
    }

    fn put(&mut self, epc: &str, name: &str) -> Result<(), TrackerError> {
        self.entries.insert(storage_key(epc), encode_value(epc, name));
        Ok(())
    }
}

/// Store backed by a JSON object on disk, rewritten on every put
#[derive(Debug)]
pub struct JsonFileNameStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileNameStore {
    /// Open `path`, starting empty if the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                TrackerError::Store(format!("{} is not a valid names file: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No names file at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => {
                return Err(TrackerError::Store(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        info!("Loaded {} bottle names from {:?}", entries.len(), path);
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries).map_err(io::Error::other)?;
        fs::write(&self.path, json)
    }
}

impl NameStore for JsonFileNameStore {
    fn get(&self, epc: &str) -> Option<String> {
        self.entries
            .get(&storage_key(epc))
            .and_then(|stored| decode_value(stored, epc))
    }

    fn put(&mut self, epc: &str, name: &str) -> Result<(), TrackerError> {
        // Memory only changes once the file holds the new name.
        let mut updated = self.entries.clone();
        updated.insert(storage_key(epc), encode_value(epc, name));
        self.flush(&updated).map_err(|e| {
            TrackerError::Store(format!("failed to write {}: {}", self.path.display(), e))
        })?;
        self.entries = updated;
        info!("Saved: {} -> {}", epc, name);
        Ok(())
    }
}
