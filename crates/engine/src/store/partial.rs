//! Merge-on-resume storage for partial results.
//!
//! Each checkpoint reads whatever is already stored under the key, appends the
//! new records to the collection field and rewrites the merged object in one
//! pass. There is no locking or versioning: exactly one coordinator is
//! assumed to write a given key at a time.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use super::object_store::{ObjectStore, StoreError};

/// Default name of the collection field in a result object.
pub const DEFAULT_COLLECTION_FIELD: &str = "results";

#[derive(Debug, Clone)]
pub struct PartialResultStore<S: ObjectStore> {
    store: S,
    field: String,
}

impl<S: ObjectStore> PartialResultStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_field(store, DEFAULT_COLLECTION_FIELD)
    }

    pub fn with_field(store: S, field: impl Into<String>) -> Self {
        Self {
            store,
            field: field.into(),
        }
    }

    /// Append `records` to the object at `key` and write it back.
    ///
    /// A failed or garbled read starts from an empty object; a failed write
    /// is returned to the caller. Returns the merged collection size.
    pub fn checkpoint<T: Serialize>(&self, key: &str, records: &[T]) -> Result<usize, StoreError> {
        let mut document = self.read_document(key);

        let mut appended = Vec::with_capacity(records.len());
        for record in records {
            appended.push(
                serde_json::to_value(record).map_err(|e| StoreError::Storage(e.to_string()))?,
            );
        }

        let collection = document
            .entry(self.field.clone())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        if !collection.is_array() {
            warn!(key, field = %self.field, "collection field is not an array; replacing it");
            *collection = JsonValue::Array(Vec::new());
        }

        let merged = match collection {
            JsonValue::Array(items) => {
                items.extend(appended);
                items.len()
            }
            _ => 0,
        };

        document.insert(
            "updated_at".to_string(),
            JsonValue::String(Utc::now().to_rfc3339()),
        );

        let body = serde_json::to_vec(&JsonValue::Object(document))
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        self.store.put(key, &body)?;

        debug!(key, appended = records.len(), merged, "checkpoint written");
        Ok(merged)
    }

    /// Current collection at `key` (empty when absent or unreadable).
    pub fn load(&self, key: &str) -> Vec<JsonValue> {
        match self.read_document(key).remove(&self.field) {
            Some(JsonValue::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    fn read_document(&self, key: &str) -> Map<String, JsonValue> {
        match self.store.get(key) {
            Ok(Some(body)) => match serde_json::from_slice::<JsonValue>(&body) {
                Ok(JsonValue::Object(map)) => map,
                Ok(_) => {
                    warn!(key, "stored partial result is not an object; starting empty");
                    Map::new()
                }
                Err(e) => {
                    warn!(key, error = %e, "stored partial result is not valid JSON; starting empty");
                    Map::new()
                }
            },
            Ok(None) => Map::new(),
            Err(e) => {
                warn!(key, error = %e, "failed to read partial result; starting empty");
                Map::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::store::InMemoryObjectStore;

    /// Store whose reads always fail; writes go to an inner store.
    struct UnreadableStore {
        inner: InMemoryObjectStore,
    }

    impl ObjectStore for UnreadableStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Storage("read timeout".to_string()))
        }

        fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
            self.inner.put(key, body)
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(prefix)
        }
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl ObjectStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn put(&self, _key: &str, _body: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Storage("access denied".to_string()))
        }

        fn list(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn first_checkpoint_creates_the_object() {
        let store = InMemoryObjectStore::arc();
        let partial = PartialResultStore::new(store.clone());

        let merged = partial.checkpoint("k", &[json!({"index": 0}), json!({"index": 1})]).unwrap();
        assert_eq!(merged, 2);
        assert_eq!(partial.load("k").len(), 2);
    }

    #[test]
    fn later_checkpoints_append() {
        let store = InMemoryObjectStore::arc();
        let partial = PartialResultStore::with_field(store.clone(), "CustomLabels");

        partial.checkpoint("k", &[json!(1), json!(2)]).unwrap();
        let merged = partial.checkpoint("k", &[json!(3)]).unwrap();

        assert_eq!(merged, 3);
        assert_eq!(partial.load("k"), vec![json!(1), json!(2), json!(3)]);

        let raw: JsonValue = serde_json::from_slice(&store.get("k").unwrap().unwrap()).unwrap();
        assert!(raw["CustomLabels"].is_array());
        assert!(raw["updated_at"].is_string());
    }

    #[test]
    fn other_fields_are_preserved() {
        let store = InMemoryObjectStore::arc();
        store
            .put("k", br#"{"Bucket":"media","results":[0]}"#)
            .unwrap();
        let partial = PartialResultStore::new(store.clone());

        partial.checkpoint("k", &[json!(1)]).unwrap();

        let raw: JsonValue = serde_json::from_slice(&store.get("k").unwrap().unwrap()).unwrap();
        assert_eq!(raw["Bucket"], "media");
        assert_eq!(raw["results"], json!([0, 1]));
    }

    #[test]
    fn garbled_object_degrades_to_empty() {
        let store = InMemoryObjectStore::arc();
        store.put("k", b"not json").unwrap();
        let partial = PartialResultStore::new(store.clone());

        assert_eq!(partial.checkpoint("k", &[json!(7)]).unwrap(), 1);
        assert_eq!(partial.load("k"), vec![json!(7)]);
    }

    #[test]
    fn read_failure_never_aborts_the_checkpoint() {
        let store = Arc::new(UnreadableStore {
            inner: InMemoryObjectStore::new(),
        });
        let partial = PartialResultStore::new(store.clone());

        assert_eq!(partial.checkpoint("k", &[json!(1)]).unwrap(), 1);
        assert!(store.inner.get("k").unwrap().is_some());
    }

    #[test]
    fn write_failure_is_returned() {
        let partial = PartialResultStore::new(ReadOnlyStore);
        assert!(partial.checkpoint("k", &[json!(1)]).is_err());
    }
}
