use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{StorageError, TierStore};
use crate::entry::{now_millis, Locator, StoredEntry};
use crate::parameter::SearchParameter;
use crate::search::PatternIndex;

#[derive(Default)]
struct Pointers {
    by_key: HashMap<String, String>,
    by_alias: HashMap<i64, String>,
    patterns: PatternIndex,
}

/// In-process [`TierStore`]. Stands in for Redis or SQL when embedding
/// without external services, and backs most of the test suite.
pub struct MemoryTier {
    records: DashMap<String, StoredEntry>,
    /// Pointer and pattern maps; record inserts/removes happen under it too
    pointers: Mutex<Pointers>,
}

impl MemoryTier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            pointers: Mutex::new(Pointers::default()),
        }
    }

    /// Get current record count (expired records included until touched)
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records
    pub fn clear(&self) {
        let mut ptr = self.pointers.lock();
        self.records.clear();
        *ptr = Pointers::default();
    }

    fn resolve(&self, ptr: &Pointers, locator: &Locator) -> Option<String> {
        let id = match locator {
            Locator::Key(k) | Locator::KeyAlias { key: k, .. } => ptr.by_key.get(k)?,
            Locator::Alias(a) => ptr.by_alias.get(a)?,
        };
        let record = self.records.get(id)?;
        record.matches(locator).then(|| id.clone())
    }

    fn remove_identity(&self, ptr: &mut Pointers, identity: &str) -> Option<StoredEntry> {
        let (_, record) = self.records.remove(identity)?;
        if let Some(key) = record.key() {
            if ptr.by_key.get(key).map(String::as_str) == Some(identity) {
                ptr.by_key.remove(key);
            }
        }
        if let Some(alias) = record.alias() {
            if ptr.by_alias.get(&alias).map(String::as_str) == Some(identity) {
                ptr.by_alias.remove(&alias);
            }
        }
        ptr.patterns.unregister(identity);
        Some(record)
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TierStore for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, record: &StoredEntry) -> Result<(), StorageError> {
        let mut ptr = self.pointers.lock();
        self.remove_identity(&mut ptr, record.identity());
        if let Some(key) = record.key() {
            if let Some(old) = self.resolve(&ptr, &Locator::Key(key.to_string())) {
                self.remove_identity(&mut ptr, &old);
            }
        }
        if let Some(alias) = record.alias() {
            if let Some(old) = self.resolve(&ptr, &Locator::Alias(alias)) {
                self.remove_identity(&mut ptr, &old);
            }
        }

        let identity = record.identity().to_string();
        if let Some(key) = record.key() {
            ptr.by_key.insert(key.to_string(), identity.clone());
        }
        if let Some(alias) = record.alias() {
            ptr.by_alias.insert(alias, identity.clone());
        }
        ptr.patterns.register(&identity, record.parameters());
        self.records.insert(identity, record.clone());
        Ok(())
    }

    async fn get(&self, locator: &Locator) -> Result<Option<StoredEntry>, StorageError> {
        let mut ptr = self.pointers.lock();
        let Some(id) = self.resolve(&ptr, locator) else {
            return Ok(None);
        };
        let expired = self.records.get(&id).map(|r| r.is_expired_at(now_millis()));
        match expired {
            Some(false) => Ok(self.records.get(&id).map(|r| r.value().clone())),
            Some(true) => {
                self.remove_identity(&mut ptr, &id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn search(&self, parameters: &[SearchParameter]) -> Result<Vec<StoredEntry>, StorageError> {
        let mut ptr = self.pointers.lock();
        let now = now_millis();
        let mut hits = Vec::new();
        for id in ptr.patterns.search(parameters) {
            let record = self.records.get(&id).map(|r| r.value().clone());
            match record {
                Some(r) if r.is_expired_at(now) => {
                    self.remove_identity(&mut ptr, &id);
                }
                Some(r) => hits.push(r),
                None => {}
            }
        }
        Ok(hits)
    }

    async fn invalidate(&self, locator: &Locator) -> Result<(), StorageError> {
        let mut ptr = self.pointers.lock();
        if let Some(id) = self.resolve(&ptr, locator) {
            self.remove_identity(&mut ptr, &id);
        }
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), StorageError> {
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn p(name: &str, value: &str, level: u32) -> SearchParameter {
        SearchParameter::new(name, value, level).unwrap()
    }

    fn record(key: &str, alias: Option<i64>, params: &[SearchParameter]) -> StoredEntry {
        CacheEntry::new(Some(key.to_string()), alias, params, json!({"key": key}), None).unwrap()
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryTier::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_put_and_get_by_key_and_alias() {
        let store = MemoryTier::new();
        store.put(&record("A", Some(7), &[])).await.unwrap();

        let by_key = store.get(&Locator::Key("A".into())).await.unwrap().unwrap();
        assert_eq!(by_key.value["key"], "A");
        assert!(store.get(&Locator::Alias(7)).await.unwrap().is_some());
        assert!(store.get(&Locator::from(("A", 7i64))).await.unwrap().is_some());
        assert!(store.get(&Locator::Alias(8)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = MemoryTier::new();
        assert!(store.get(&Locator::Key("nope".into())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_same_key() {
        let store = MemoryTier::new();
        store.put(&record("A", None, &[p("region", "emea", 0)])).await.unwrap();
        store.put(&record("A", None, &[p("region", "apac", 0)])).await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.search(&[p("region", "emea", 0)]).await.unwrap().is_empty());
        assert_eq!(store.search(&[p("region", "apac", 0)]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_subset() {
        let store = MemoryTier::new();
        let full = [p("region", "emea", 0), p("category", "shoes", 1), p("brand", "acme", 2)];
        store.put(&record("A", None, &full)).await.unwrap();
        store.put(&record("B", None, &full[..1])).await.unwrap();

        assert_eq!(store.search(&[full[0].clone()]).await.unwrap().len(), 2);
        let gapped = store.search(&[full[0].clone(), full[2].clone()]).await.unwrap();
        assert_eq!(gapped.len(), 1);
        assert_eq!(gapped[0].key(), Some("A"));
    }

    #[tokio::test]
    async fn test_invalidate_cascades() {
        let store = MemoryTier::new();
        store.put(&record("A", Some(7), &[p("region", "emea", 0)])).await.unwrap();

        store.invalidate(&Locator::Alias(7)).await.unwrap();
        assert!(store.get(&Locator::Key("A".into())).await.unwrap().is_none());
        assert!(store.search(&[p("region", "emea", 0)]).await.unwrap().is_empty());
        assert!(store.is_empty());

        // missing is fine
        store.invalidate(&Locator::Alias(7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_records_are_absent() {
        let store = MemoryTier::new();
        let mut short = CacheEntry::new(Some("A".into()), None, &[p("region", "emea", 0)], json!(1), Some(Duration::from_millis(10))).unwrap();
        short.created_at -= 1_000;
        store.put(&short).await.unwrap();

        assert!(store.get(&Locator::Key("A".into())).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let store = MemoryTier::new();
        for i in 0..10 {
            store.put(&record(&format!("k{}", i), Some(i), &[p("region", "emea", 0)])).await.unwrap();
        }
        assert_eq!(store.len(), 10);
        store.invalidate_all().await.unwrap();
        assert!(store.is_empty());
        assert!(store.search(&[p("region", "emea", 0)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let store = Arc::new(MemoryTier::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let r = record(&format!("batch-{}-item-{}", batch, i), None, &[p("region", "emea", 0)]);
                    store_clone.put(&r).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
        assert_eq!(store.search(&[p("region", "emea", 0)]).await.unwrap().len(), 100);
    }
}
