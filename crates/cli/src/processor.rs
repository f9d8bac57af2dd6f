//! Built-in item processor: records the byte size of each item's artifact.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use stepwise_core::{join_key, ItemError, WorkItem, WorkItemId};
use stepwise_engine::{ItemProcessor, ObjectStore};

/// Key of a rendered page artifact (`page.0003.png`).
pub fn page_key(prefix: &str, page_no: u32) -> String {
    join_key(prefix, &format!("page.{page_no:04}.png"))
}

pub struct ArtifactStat<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    pages_prefix: String,
}

impl<S: ObjectStore + ?Sized> ArtifactStat<S> {
    pub fn new(store: Arc<S>, pages_prefix: impl Into<String>) -> Self {
        Self {
            store,
            pages_prefix: pages_prefix.into(),
        }
    }

    fn artifact_key(&self, item: &WorkItem) -> Result<String, ItemError> {
        match &item.id {
            WorkItemId::Frame { key, .. } => Ok(key.clone()),
            WorkItemId::Page { page_no } => Ok(page_key(&self.pages_prefix, *page_no)),
            WorkItemId::Unit | WorkItemId::Subtask { .. } => Err(ItemError::new(format!(
                "item {} has no artifact",
                item.index
            ))),
        }
    }
}

impl<S: ObjectStore + ?Sized> ItemProcessor for ArtifactStat<S> {
    fn process(&self, item: &WorkItem) -> Result<JsonValue, ItemError> {
        let key = self.artifact_key(item)?;
        match self.store.get(&key) {
            Ok(Some(body)) => Ok(json!({ "key": key, "bytes": body.len() })),
            Ok(None) => Err(ItemError::new(format!("artifact not found: {key}"))),
            Err(e) => Err(ItemError::new(format!("failed to read {key}: {e}"))),
        }
    }
}
