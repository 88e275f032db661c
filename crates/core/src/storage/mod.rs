//! Persistent key-value medium.
//!
//! String keys map to string values. Structured data is layered on top as
//! JSON, namespaced by key prefix (`enhanced_cache_`, `fallback_`,
//! `user_profile_`). A medium may refuse writes once its capacity is used up,
//! which callers observe as [`StorageError::QuotaExceeded`].

mod file;
mod memory;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use file::FileMedium;
pub use memory::MemoryMedium;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage quota exceeded writing `{key}` ({required} bytes needed, {available} available)")]
    QuotaExceeded { key: String, required: usize, available: usize },
    #[error("storage io failure: {0}")]
    Io(String),
    #[error("stored value under `{key}` could not be decoded: {message}")]
    Corrupted { key: String, message: String },
    #[error("value for `{key}` could not be encoded: {message}")]
    Encode { key: String, message: String },
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

pub trait KeyValueMedium: Send {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&mut self, key: &str) -> Result<(), StorageError>;
    fn len(&self) -> usize;
    fn key(&self, index: usize) -> Option<String>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys(&self) -> Vec<String> {
        (0..self.len()).filter_map(|index| self.key(index)).collect()
    }
}

/// Cloneable handle to a medium shared between components.
///
/// The lock is held only for the duration of a single synchronous medium call.
#[derive(Clone)]
pub struct LocalStorage {
    medium: Arc<Mutex<Box<dyn KeyValueMedium>>>,
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage").field("len", &self.len()).finish()
    }
}

impl LocalStorage {
    pub fn new(medium: impl KeyValueMedium + 'static) -> Self {
        Self { medium: Arc::new(Mutex::new(Box::new(medium))) }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryMedium::default())
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn KeyValueMedium>> {
        self.medium.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.lock().get_item(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().set_item(key, value)
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove_item(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys().into_iter().filter(|key| key.starts_with(prefix)).collect()
    }

    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.get_item(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|error| StorageError::Corrupted { key: key.to_string(), message: error.to_string() })
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)
            .map_err(|error| StorageError::Encode { key: key.to_string(), message: error.to_string() })?;
        self.set_item(key, &raw)
    }
}
