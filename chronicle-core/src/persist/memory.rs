use super::{PersistError, RecordKind, RecordStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Process-local store, used by tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RecordKind, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Value>, PersistError> {
        Ok(self
            .records
            .read()
            .await
            .get(&kind)
            .and_then(|bucket| bucket.get(key))
            .cloned())
    }

    async fn put(&self, kind: RecordKind, key: &str, value: Value) -> Result<(), PersistError> {
        self.records
            .write()
            .await
            .entry(kind)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<bool, PersistError> {
        Ok(self
            .records
            .write()
            .await
            .get_mut(&kind)
            .and_then(|bucket| bucket.remove(key))
            .is_some())
    }

    async fn list(&self, kind: RecordKind) -> Result<Vec<(String, Value)>, PersistError> {
        Ok(self
            .records
            .read()
            .await
            .get(&kind)
            .map(|bucket| bucket.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
