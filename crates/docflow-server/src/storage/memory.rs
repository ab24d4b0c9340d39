//! In-memory object store for tests and local development

use super::{ObjectStore, PutResult, StorageError, StorageResult};
use docflow_common::checksum::sha256_hex;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects. Test helper.
    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: Option<String>,
    ) -> StorageResult<PutResult> {
        let checksum = sha256_hex(&data);
        let size = data.len() as i64;

        let mut objects = self
            .objects
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        objects.insert(key.to_string(), data);

        Ok(PutResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let objects = self
            .objects
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let objects = self
            .objects
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(objects.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryObjectStore::new();

        let result = store
            .put("uploads/x/a.pdf", b"payload".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(result.size, 7);
        assert!(store.exists("uploads/x/a.pdf").await.unwrap());

        let data = store.get("uploads/x/a.pdf").await.unwrap();
        assert_eq!(data, b"payload");

        store.delete("uploads/x/a.pdf").await.unwrap();
        assert!(!store.exists("uploads/x/a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let store = InMemoryObjectStore::new();
        assert!(store.delete("does/not/exist").await.is_ok());
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.get("does/not/exist").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
