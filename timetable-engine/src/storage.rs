//! Shared key-value storage for provider scripts.
//!
//! Scripts of one provider share a small map across requests and jobs, e.g.
//! to remember a session token fetched once. Access is serialized by one
//! lock per provider; concurrent jobs of the same provider see a
//! linearizable map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::ProviderId;

/// A value stored by a script.
///
/// Only plain data crosses jobs; anything richer stays inside the sandbox
/// that created it.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl From<String> for StorageValue {
    fn from(s: String) -> Self {
        StorageValue::Text(s)
    }
}

impl From<&str> for StorageValue {
    fn from(s: &str) -> Self {
        StorageValue::Text(s.to_string())
    }
}

impl From<i64> for StorageValue {
    fn from(i: i64) -> Self {
        StorageValue::Integer(i)
    }
}

impl From<f64> for StorageValue {
    fn from(f: f64) -> Self {
        StorageValue::Float(f)
    }
}

impl From<bool> for StorageValue {
    fn from(b: bool) -> Self {
        StorageValue::Boolean(b)
    }
}

/// Key-value storage shared by all jobs of one provider.
#[derive(Debug, Default)]
pub struct ProviderStorage {
    values: Mutex<HashMap<String, StorageValue>>,
}

impl ProviderStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a key, replacing any previous value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<StorageValue>) {
        let mut guard = self.values.lock().expect("storage lock poisoned");
        guard.insert(key.into(), value.into());
    }

    /// Read the value stored under a key.
    pub fn get(&self, key: &str) -> Option<StorageValue> {
        let guard = self.values.lock().expect("storage lock poisoned");
        guard.get(key).cloned()
    }

    /// Remove a key, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<StorageValue> {
        let mut guard = self.values.lock().expect("storage lock poisoned");
        guard.remove(key)
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        let guard = self.values.lock().expect("storage lock poisoned");
        guard.contains_key(key)
    }

    /// Drop all stored values.
    pub fn clear(&self) {
        let mut guard = self.values.lock().expect("storage lock poisoned");
        guard.clear();
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        let guard = self.values.lock().expect("storage lock poisoned");
        guard.len()
    }

    /// Whether the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hands out the shared storage for each provider.
///
/// The registry itself is cheap to clone; all clones see the same
/// per-provider maps.
#[derive(Debug, Clone, Default)]
pub struct StorageRegistry {
    providers: Arc<Mutex<HashMap<ProviderId, Arc<ProviderStorage>>>>,
}

impl StorageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the storage for a provider, creating it on first use.
    pub fn storage_for(&self, provider: &ProviderId) -> Arc<ProviderStorage> {
        let mut guard = self.providers.lock().expect("registry lock poisoned");
        guard
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(ProviderStorage::new()))
            .clone()
    }
}
