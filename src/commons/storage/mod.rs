//! Persistent storage of data.
//!
//! Values are kept as JSON under a [`Key`] inside a namespace. The backend
//! is selected by the scheme of the storage URI: `memory://` keeps values
//! in a process wide map, `local://` keeps them as files on disk.

pub use self::disk::Disk;
pub use self::memory::Memory;

mod disk;
mod memory;

use std::fmt;
use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;
use crate::commons::error::CrlIoError;


//------------ KeyValueStore -------------------------------------------------

#[derive(Debug)]
pub enum KeyValueStore {
    Memory(Memory),
    Disk(Disk),
}

/// # Construct and high level functions.
impl KeyValueStore {
    /// Creates a new KeyValueStore for the given namespace.
    pub fn create(
        storage_uri: &Url, namespace: &str
    ) -> Result<Self, KeyValueError> {
        Segment::check(namespace)?;
        match storage_uri.scheme() {
            "local" => {
                let path = format!(
                    "{}{}",
                    storage_uri.host_str().unwrap_or_default(),
                    storage_uri.path()
                );
                Ok(KeyValueStore::Disk(Disk::new(&path, namespace)?))
            }
            "memory" => Ok(KeyValueStore::Memory(Memory::new(
                storage_uri.host_str(),
                namespace,
            ))),
            scheme => Err(KeyValueError::UnknownScheme(scheme.to_owned())),
        }
    }

    /// Returns true if this KeyValueStore (with this namespace) has any
    /// entries.
    pub fn is_empty(&self) -> Result<bool, KeyValueError> {
        match self {
            KeyValueStore::Memory(m) => m.is_empty(),
            KeyValueStore::Disk(d) => d.is_empty(),
        }
    }

    /// Runs `op` while holding the lock for the given scope.
    ///
    /// Use this when several values under one scope must change together.
    pub fn execute<F, T>(
        &self, scope: Option<&str>, op: F
    ) -> Result<T, KeyValueError>
    where
        F: FnOnce(&Self) -> Result<T, KeyValueError>,
    {
        match self {
            KeyValueStore::Memory(m) => {
                let _lock = m.lock_scope(scope)?;
                op(self)
            }
            KeyValueStore::Disk(d) => {
                let mut lock = d.lock_scope(scope)?;
                let _guard = lock.write()?;
                op(self)
            }
        }
    }
}

/// # Keys and Values
impl KeyValueStore {
    /// Stores a key value pair, serialized as json, overwrite existing.
    pub fn store<V: Serialize>(
        &self, key: &Key, value: &V
    ) -> Result<(), KeyValueError> {
        let value = serde_json::to_value(value)?;
        match self {
            KeyValueStore::Memory(m) => m.store(key, value),
            KeyValueStore::Disk(d) => d.store(key, value),
        }
    }

    /// Gets a value for a key, returns an error if the value cannot be
    /// deserialized, returns None if it cannot be found.
    pub fn get<V: DeserializeOwned>(
        &self, key: &Key
    ) -> Result<Option<V>, KeyValueError> {
        let value = match self {
            KeyValueStore::Memory(m) => m.get(key)?,
            KeyValueStore::Disk(d) => d.get(key)?,
        };
        match value {
            Some(value) => {
                trace!("got value for key: {key}");
                Ok(Some(serde_json::from_value(value)?))
            }
            None => {
                trace!("got nothing for key: {key}");
                Ok(None)
            }
        }
    }

    /// Returns whether a key exists.
    pub fn has(&self, key: &Key) -> Result<bool, KeyValueError> {
        match self {
            KeyValueStore::Memory(m) => m.has(key),
            KeyValueStore::Disk(d) => d.has(key),
        }
    }

    /// Delete a key-value pair. Deleting a missing key is not an error.
    pub fn drop_key(&self, key: &Key) -> Result<(), KeyValueError> {
        match self {
            KeyValueStore::Memory(m) => m.delete(key),
            KeyValueStore::Disk(d) => d.delete(key),
        }
    }

    /// Delete all keys in a scope.
    pub fn drop_scope(&self, scope: &str) -> Result<(), KeyValueError> {
        match self {
            KeyValueStore::Memory(m) => m.delete_scope(scope),
            KeyValueStore::Disk(d) => d.delete_scope(scope),
        }
    }

    /// Returns all keys directly under the given scope, sorted.
    ///
    /// If `scope` is `None`, the global keys are returned.
    pub fn keys(
        &self, scope: Option<&str>
    ) -> Result<Vec<Key>, KeyValueError> {
        let mut keys = match self {
            KeyValueStore::Memory(m) => m.list_keys(scope)?,
            KeyValueStore::Disk(d) => d.list_keys(scope)?,
        };
        keys.sort();
        Ok(keys)
    }

    /// Returns all scopes that hold at least one key.
    pub fn scopes(&self) -> Result<Vec<String>, KeyValueError> {
        let mut scopes = match self {
            KeyValueStore::Memory(m) => m.list_scopes()?,
            KeyValueStore::Disk(d) => d.list_scopes()?,
        };
        scopes.sort();
        scopes.dedup();
        Ok(scopes)
    }
}

impl fmt::Display for KeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValueStore::Memory(memory) => memory.fmt(f),
            KeyValueStore::Disk(disk) => disk.fmt(f),
        }
    }
}


//------------ Segment -------------------------------------------------------

/// Validation of the parts that make up namespaces and keys.
struct Segment;

impl Segment {
    fn check(s: &str) -> Result<(), KeyValueError> {
        if s.is_empty() || s.contains('/') || s.contains('\\') || s == ".."
            || s == "."
        {
            Err(KeyValueError::InvalidSegment(s.to_string()))
        } else {
            Ok(())
        }
    }
}


//------------ Key -----------------------------------------------------------

/// The key of a stored value: an optional scope and a name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key {
    scope: Option<String>,
    name: String,
}

impl Key {
    pub fn new_global(name: &str) -> Result<Self, KeyValueError> {
        Segment::check(name)?;
        Ok(Key { scope: None, name: name.to_string() })
    }

    pub fn new_scoped(
        scope: &str, name: &str
    ) -> Result<Self, KeyValueError> {
        Segment::check(scope)?;
        Segment::check(name)?;
        Ok(Key {
            scope: Some(scope.to_string()),
            name: name.to_string(),
        })
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}/{}", scope, self.name),
            None => self.name.fmt(f),
        }
    }
}


//------------ StorageResult -------------------------------------------------

pub type StorageResult<T> = Result<T, KeyValueError>;


//------------ KeyValueError -------------------------------------------------

/// This type defines possible Errors for the key value store.
#[derive(Debug)]
pub enum KeyValueError {
    UnknownScheme(String),
    InvalidSegment(String),
    IoError(CrlIoError),
    JsonError(serde_json::Error),
    Other(String),
}

impl From<CrlIoError> for KeyValueError {
    fn from(e: CrlIoError) -> Self {
        KeyValueError::IoError(e)
    }
}

impl From<serde_json::Error> for KeyValueError {
    fn from(e: serde_json::Error) -> Self {
        KeyValueError::JsonError(e)
    }
}

impl fmt::Display for KeyValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyValueError::UnknownScheme(e) => {
                write!(f, "Unknown Scheme: {e}")
            }
            KeyValueError::InvalidSegment(s) => {
                write!(f, "Invalid key or namespace segment: '{s}'")
            }
            KeyValueError::IoError(e) => write!(f, "I/O error: {e}"),
            KeyValueError::JsonError(e) => write!(f, "JSON error: {e}"),
            KeyValueError::Other(msg) => write!(f, "{msg}"),
        }
    }
}


//------------ Tests ---------------------------------------------------------
