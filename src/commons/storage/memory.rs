use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use lazy_static::lazy_static;
use serde_json::Value;
use super::{Key, KeyValueError, StorageResult};


//------------ MemoryStore ---------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore(HashMap<String, BTreeMap<Key, Value>>);

impl MemoryStore {
    fn namespace_is_empty(&self, namespace: &str) -> bool {
        self.0.get(namespace).map(|m| m.is_empty()).unwrap_or(true)
    }

    fn has(&self, namespace: &str, key: &Key) -> bool {
        self.0.get(namespace).map(|m| m.contains_key(key)).unwrap_or(false)
    }

    fn get(&self, namespace: &str, key: &Key) -> Option<Value> {
        self.0.get(namespace).and_then(|m| m.get(key).cloned())
    }

    fn insert(&mut self, namespace: &str, key: &Key, value: Value) {
        self.0
            .entry(namespace.to_string())
            .or_default()
            .insert(key.clone(), value);
    }

    fn delete(&mut self, namespace: &str, key: &Key) {
        if let Some(map) = self.0.get_mut(namespace) {
            map.remove(key);
        }
    }

    fn delete_scope(&mut self, namespace: &str, scope: &str) {
        if let Some(map) = self.0.get_mut(namespace) {
            map.retain(|k, _| k.scope() != Some(scope));
        }
    }

    fn list_keys(&self, namespace: &str, scope: Option<&str>) -> Vec<Key> {
        self.0
            .get(namespace)
            .map(|m| {
                m.keys().filter(|k| k.scope() == scope).cloned().collect()
            })
            .unwrap_or_default()
    }

    fn list_scopes(&self, namespace: &str) -> Vec<String> {
        let scopes: BTreeSet<String> = self
            .0
            .get(namespace)
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.scope().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default();
        scopes.into_iter().collect()
    }
}

lazy_static! {
    static ref STORE: Mutex<MemoryStore> = Mutex::new(MemoryStore::default());
    static ref LOCKS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}


//------------ Memory --------------------------------------------------------

/// A view on the process wide in-memory store for one namespace.
#[derive(Clone, Debug)]
pub struct Memory {
    // The host part of the storage URI is used as a prefix, so that
    // tests using different URIs don't see each other's data.
    effective_namespace: String,
    inner: &'static Mutex<MemoryStore>,
    locks: &'static Mutex<HashSet<String>>,
}

impl Memory {
    pub(super) fn new(prefix: Option<&str>, namespace: &str) -> Self {
        let effective_namespace = match prefix {
            Some(pfx) => format!("{pfx}_{namespace}"),
            None => namespace.to_string(),
        };
        Memory { effective_namespace, inner: &STORE, locks: &LOCKS }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, MemoryStore>> {
        self.inner.lock().map_err(|e| {
            KeyValueError::Other(format!("cannot unlock mutex: {e}"))
        })
    }

    /// Claims the lock for a scope, waiting up to ten seconds for it.
    pub(super) fn lock_scope(
        &self, scope: Option<&str>
    ) -> StorageResult<ScopeGuard> {
        let wait_ms = 10;
        let tries = 1000;

        let name = format!(
            "{}/{}", self.effective_namespace, scope.unwrap_or_default()
        );

        for _ in 0..tries {
            let mut locks = self.locks.lock().map_err(|e| {
                KeyValueError::Other(format!("Can't get lock: {e}"))
            })?;
            if locks.contains(&name) {
                drop(locks);
                thread::sleep(Duration::from_millis(wait_ms));
            } else {
                locks.insert(name.clone());
                return Ok(ScopeGuard { name, locks: self.locks })
            }
        }
        Err(KeyValueError::Other(format!("Scope {name} already locked")))
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory://{}", self.effective_namespace)
    }
}

impl Memory {
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.lock()?.namespace_is_empty(&self.effective_namespace))
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        Ok(self.lock()?.has(&self.effective_namespace, key))
    }

    pub fn get(&self, key: &Key) -> StorageResult<Option<Value>> {
        Ok(self.lock()?.get(&self.effective_namespace, key))
    }

    pub fn list_keys(&self, scope: Option<&str>) -> StorageResult<Vec<Key>> {
        Ok(self.lock()?.list_keys(&self.effective_namespace, scope))
    }

    pub fn list_scopes(&self) -> StorageResult<Vec<String>> {
        Ok(self.lock()?.list_scopes(&self.effective_namespace))
    }

    pub fn store(&self, key: &Key, value: Value) -> StorageResult<()> {
        self.lock()?.insert(&self.effective_namespace, key, value);
        Ok(())
    }

    pub fn delete(&self, key: &Key) -> StorageResult<()> {
        self.lock()?.delete(&self.effective_namespace, key);
        Ok(())
    }

    pub fn delete_scope(&self, scope: &str) -> StorageResult<()> {
        self.lock()?.delete_scope(&self.effective_namespace, scope);
        Ok(())
    }
}


//------------ ScopeGuard ----------------------------------------------------

/// Releases a claimed scope lock when dropped.
pub(super) struct ScopeGuard {
    name: String,
    locks: &'static Mutex<HashSet<String>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&self.name);
        }
    }
}
