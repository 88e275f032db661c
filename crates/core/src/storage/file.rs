use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::memory::check_quota;
use super::{KeyValueMedium, StorageError};

/// Medium persisted as a single JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    items: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
}

impl FileMedium {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let items = load_items(&path)?;
        Ok(Self { path, items, quota_bytes: None })
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| StorageError::Io(error.to_string()))?;
        }

        let raw = serde_json::to_string(&self.items).map_err(|error| StorageError::Encode {
            key: self.path.display().to_string(),
            message: error.to_string(),
        })?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, raw).map_err(|error| StorageError::Io(error.to_string()))?;
        fs::rename(&staging, &self.path).map_err(|error| StorageError::Io(error.to_string()))
    }
}

fn load_items(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let raw = fs::read_to_string(path).map_err(|error| StorageError::Io(error.to_string()))?;
    match serde_json::from_str(&raw) {
        Ok(items) => Ok(items),
        Err(error) => {
            warn!(
                event_name = "storage.file.corrupted",
                path = %path.display(),
                error = %error,
                "discarding unreadable storage file"
            );
            Ok(BTreeMap::new())
        }
    }
}

impl KeyValueMedium for FileMedium {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        check_quota(&self.items, self.quota_bytes, key, value)?;
        let previous = self.items.insert(key.to_string(), value.to_string());
        if let Err(error) = self.persist() {
            match previous {
                Some(previous) => self.items.insert(key.to_string(), previous),
                None => self.items.remove(key),
            };
            return Err(error);
        }
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        if self.items.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.items.keys().nth(index).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }
}
