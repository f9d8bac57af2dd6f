//! Durable object storage abstraction.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Key/value object storage (bucket-like).
///
/// Readers must tolerate missing objects (`Ok(None)`). No atomic visibility is
/// promised across concurrent writers; callers rely on a single writer per key.
pub trait ObjectStore: Send + Sync {
    /// Read an object. Returns `None` if it does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or replace an object.
    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;

    /// List keys starting with `prefix`, in lexicographic order.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Object store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<StoreError> for stepwise_core::EngineError {
    fn from(e: StoreError) -> Self {
        stepwise_core::EngineError::store(e.to_string())
    }
}

/// In-memory object store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        Ok(objects.get(key).cloned())
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, body)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(prefix)
    }
}
