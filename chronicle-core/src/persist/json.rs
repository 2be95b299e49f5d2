//! One pretty-printed JSON file per record under `<root>/<kind>/<key>.json`.

use super::{PersistError, RecordKind, RecordStore};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.name())
    }

    fn path(&self, kind: RecordKind, key: &str) -> PathBuf {
        self.dir(kind).join(format!("{}.json", sanitize(key)))
    }
}

/// Keys are ids, but keep anything path-hostile out of file names.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Value>, PersistError> {
        match fs::read_to_string(self.path(kind, key)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, kind: RecordKind, key: &str, value: Value) -> Result<(), PersistError> {
        fs::create_dir_all(self.dir(kind)).await?;
        let path = self.path(kind, key);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&value)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<bool, PersistError> {
        match fs::remove_file(self.path(kind, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, kind: RecordKind) -> Result<Vec<(String, Value)>, PersistError> {
        let mut entries = match fs::read_dir(self.dir(kind)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let Some(key) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                    continue;
                };
                let content = fs::read_to_string(&path).await?;
                records.push((key, serde_json::from_str(&content)?));
            }
        }

        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_store_layout() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonFileStore::new(temp_dir.path());

        store
            .put(RecordKind::Character, "abc-123", json!({"name": "Aria"}))
            .await
            .expect("Put should succeed");

        assert!(temp_dir.path().join("characters").join("abc-123.json").exists());
        assert_eq!(
            store.get(RecordKind::Character, "abc-123").await.unwrap(),
            Some(json!({"name": "Aria"}))
        );
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonFileStore::new(temp_dir.path().join("nowhere"));

        assert!(store.list(RecordKind::Thread).await.unwrap().is_empty());
        assert!(store.get(RecordKind::Thread, "x").await.unwrap().is_none());
        assert!(!store.delete(RecordKind::Thread, "x").await.unwrap());
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
    }
}
