//! Worker → coordinator messages and the stored result records.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use stepwise_core::{ItemError, SubtaskId, SubtaskProgress, SubtaskStatus, WorkItem, WorkItemId};

/// Outcome of one homogeneous item, streamed as soon as it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemMessage {
    Completed { index: usize, result: JsonValue },
    Failed { index: usize, error: ItemError },
}

impl ItemMessage {
    pub fn index(&self) -> usize {
        match self {
            ItemMessage::Completed { index, .. } | ItemMessage::Failed { index, .. } => *index,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ItemMessage::Failed { .. })
    }
}

/// One entry of the durable result collection.
///
/// Failed items are recorded with their error and still count as done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub index: usize,
    #[serde(flatten)]
    pub id: WorkItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl ItemRecord {
    pub fn from_message(item: &WorkItem, message: ItemMessage) -> Self {
        let (result, error) = match message {
            ItemMessage::Completed { result, .. } => (Some(result), None),
            ItemMessage::Failed { error, .. } => (None, Some(error)),
        };
        Self {
            index: item.index,
            id: item.id.clone(),
            result,
            error,
        }
    }

    /// Value attached to the manifest item once reported.
    pub fn manifest_value(&self) -> JsonValue {
        match (&self.result, &self.error) {
            (Some(result), _) => result.clone(),
            (None, Some(error)) => serde_json::json!({ "error": error.message }),
            (None, None) => JsonValue::Null,
        }
    }
}

/// What a subtask hands back when it stops (finished or out of time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskReport {
    pub status: SubtaskStatus,
    #[serde(default)]
    pub partial: JsonValue,
}

impl SubtaskReport {
    pub fn completed(partial: JsonValue) -> Self {
        Self {
            status: SubtaskStatus::Completed,
            partial,
        }
    }

    pub fn in_progress(partial: JsonValue) -> Self {
        Self {
            status: SubtaskStatus::InProgress,
            partial,
        }
    }
}

/// Heterogeneous worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubtaskMessage {
    Progress {
        subtask: SubtaskId,
        status: SubtaskStatus,
        #[serde(default)]
        partial: JsonValue,
    },
    Fault {
        subtask: SubtaskId,
        reason: String,
    },
}

impl SubtaskMessage {
    pub fn report(subtask: SubtaskId, report: SubtaskReport) -> Self {
        SubtaskMessage::Progress {
            subtask,
            status: report.status,
            partial: report.partial,
        }
    }

    pub fn subtask(&self) -> &SubtaskId {
        match self {
            SubtaskMessage::Progress { subtask, .. } | SubtaskMessage::Fault { subtask, .. } => {
                subtask
            }
        }
    }
}

impl From<SubtaskProgress> for SubtaskMessage {
    fn from(progress: SubtaskProgress) -> Self {
        SubtaskMessage::Progress {
            subtask: progress.id,
            status: progress.status,
            partial: progress.partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_item_record_keeps_identity_and_error() {
        let item = WorkItem::new(3, WorkItemId::Page { page_no: 4 });
        let record = ItemRecord::from_message(
            &item,
            ItemMessage::Failed {
                index: 3,
                error: ItemError::new("throttled"),
            },
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"index": 3, "type": "page", "page_no": 4, "error": {"message": "throttled"}})
        );
        assert_eq!(record.manifest_value(), json!({"error": "throttled"}));
    }

    #[test]
    fn subtask_messages_are_tagged() {
        let message = SubtaskMessage::report(
            SubtaskId::new("celeb"),
            SubtaskReport::in_progress(json!({"cursor": 12})),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], "progress");
        assert_eq!(value["status"], "in_progress");
        assert_eq!(message.subtask().as_str(), "celeb");
    }
}
