use std::collections::BTreeMap;

use super::{KeyValueMedium, StorageError};

/// In-process medium with an optional byte quota covering keys and values.
#[derive(Debug, Default, Clone)]
pub struct MemoryMedium {
    items: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryMedium {
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self { items: BTreeMap::new(), quota_bytes: Some(quota_bytes) }
    }

    pub fn used_bytes(&self) -> usize {
        self.items.iter().map(|(key, value)| key.len() + value.len()).sum()
    }
}

pub(super) fn check_quota(
    items: &BTreeMap<String, String>,
    quota_bytes: Option<usize>,
    key: &str,
    value: &str,
) -> Result<(), StorageError> {
    let Some(quota) = quota_bytes else {
        return Ok(());
    };

    let current: usize = items
        .iter()
        .filter(|(existing, _)| existing.as_str() != key)
        .map(|(existing, stored)| existing.len() + stored.len())
        .sum();
    let required = key.len() + value.len();
    let available = quota.saturating_sub(current);
    if required > available {
        return Err(StorageError::QuotaExceeded { key: key.to_string(), required, available });
    }
    Ok(())
}

impl KeyValueMedium for MemoryMedium {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        check_quota(&self.items, self.quota_bytes, key, value)?;
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.items.remove(key);
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

#[cfg(test)]
mod tests {
    use super::MemoryMedium;
    use crate::storage::{KeyValueMedium, StorageError};

    #[test]
    fn quota_rejects_writes_that_do_not_fit() {
        let mut medium = MemoryMedium::with_quota(16);
        medium.set_item("a", "1234567").expect("fits");

        let error = medium.set_item("b", "123456789").expect_err("over quota");
        assert!(matches!(error, StorageError::QuotaExceeded { available: 8, .. }));
    }

    #[test]
    fn overwriting_a_key_does_not_double_count_it() {
        let mut medium = MemoryMedium::with_quota(10);
        medium.set_item("k", "12345678").expect("fits");
        medium.set_item("k", "87654321").expect("replacement fits");

        assert_eq!(medium.used_bytes(), 9);
    }

    #[test]
    fn keys_are_indexable_in_stable_order() {
        let mut medium = MemoryMedium::default();
        medium.set_item("b", "2").expect("write");
        medium.set_item("a", "1").expect("write");

        assert_eq!(medium.key(0).as_deref(), Some("a"));
        assert_eq!(medium.key(1).as_deref(), Some("b"));
        assert_eq!(medium.key(2), None);
        assert_eq!(medium.keys(), vec!["a", "b"]);
    }
}
