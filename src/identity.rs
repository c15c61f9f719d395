//! Display names and the key-value store that remembers them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key under which the current display name is stored
pub const USERNAME_KEY: &str = "username";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Display name cannot be empty")]
    Empty,

    #[error("Display name cannot contain ':'")]
    ContainsColon,

    #[error("Identity store IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Identity store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Name a user chats under.
///
/// The server reads the name up to the next `:` of the JOIN frame, so names
/// containing a colon would be truncated and are rejected up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(name: impl AsRef<str>) -> Result<Self, IdentityError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(IdentityError::Empty);
        }
        if name.contains(':') {
            return Err(IdentityError::ContainsColon);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Minimal string key-value store
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), IdentityError>;

    /// The remembered display name, if one is stored and valid
    fn display_name(&self) -> Option<DisplayName> {
        let stored = self.get(USERNAME_KEY)?;
        match DisplayName::new(&stored) {
            Ok(name) => Some(name),
            Err(e) => {
                log::warn!("Ignoring stored username {:?}: {}", stored, e);
                None
            }
        }
    }

    fn set_display_name(&mut self, name: &DisplayName) -> Result<(), IdentityError> {
        self.set(USERNAME_KEY, name.as_str())
    }
}

/// In-memory store, lost when the process exits
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display_name(name: &DisplayName) -> Self {
        let mut store = Self::new();
        store
            .values
            .insert(USERNAME_KEY.to_string(), name.as_str().to_string());
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a flat JSON object on disk
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.read_all() {
            Ok(mut values) => values.remove(key),
            Err(e) => {
                log::warn!("Could not read {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), IdentityError> {
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        fs::write(&self.path, serde_json::to_string_pretty(&values)?)?;
        Ok(())
    }
}
