//! Work manifests: the ordered list of items an episode must get through.

use core::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::EngineError;
use crate::id::SubtaskId;

/// Prefix of frame capture artifacts (`frame.0000042.jpg`).
pub const FRAME_CAPTURE_PREFIX: &str = "frame";

/// How a job's manifest is obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ManifestSpec {
    /// Anonymous units, addressed by index only.
    Count { total: usize },
    /// Frame captures whose count is already known.
    Frames(FrameCapture),
    /// Frame captures discovered by listing existing artifacts under `prefix`.
    FrameListing {
        prefix: String,
        framerate: f64,
        numerator: u32,
        denominator: u32,
    },
    /// Pages of a document.
    Pages { num_pages: u32 },
    /// A small fixed set of independent named subtasks.
    Subtasks { ids: Vec<SubtaskId> },
}

/// Frame capture description (where the captures live and at which rate they
/// were taken).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameCapture {
    pub prefix: String,
    pub num_frames: usize,
    /// Source video frame rate.
    pub framerate: f64,
    /// Capture rate is `numerator / denominator` frames per second.
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameCapture {
    pub fn artifact_name(capture_idx: usize) -> String {
        format!("{FRAME_CAPTURE_PREFIX}.{capture_idx:07}.jpg")
    }

    /// Parse the capture index back out of an artifact key or basename.
    pub fn parse_artifact_name(key: &str) -> Option<usize> {
        let base = key.rsplit('/').next()?;
        let digits = base
            .strip_prefix(FRAME_CAPTURE_PREFIX)?
            .strip_prefix('.')?
            .strip_suffix(".jpg")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Source frame number and timestamp (ms) of a capture index.
    pub fn frame_no_and_timestamp(
        capture_idx: usize,
        framerate: f64,
        numerator: u32,
        denominator: u32,
    ) -> (u64, u64) {
        if framerate <= 0.0 || numerator == 0 {
            return (0, 0);
        }
        let frame_no =
            ((capture_idx as f64) * framerate * f64::from(denominator) / f64::from(numerator))
                .round();
        let timestamp = (frame_no / framerate * 1000.0).round();
        (frame_no as u64, timestamp as u64)
    }

    fn validate(&self) -> Result<(), EngineError> {
        validate_rate(self.framerate, self.numerator, self.denominator)
    }

    fn item(&self, capture_idx: usize) -> WorkItemId {
        let (frame_no, timestamp_ms) = Self::frame_no_and_timestamp(
            capture_idx,
            self.framerate,
            self.numerator,
            self.denominator,
        );
        WorkItemId::Frame {
            key: join_key(&self.prefix, &Self::artifact_name(capture_idx)),
            frame_no,
            timestamp_ms,
        }
    }
}

fn validate_rate(framerate: f64, numerator: u32, denominator: u32) -> Result<(), EngineError> {
    if !(framerate.is_finite() && framerate > 0.0) {
        return Err(EngineError::manifest(format!("invalid framerate {framerate}")));
    }
    if numerator == 0 || denominator == 0 {
        return Err(EngineError::manifest(format!(
            "invalid capture rate {numerator}/{denominator}"
        )));
    }
    Ok(())
}

/// Join a storage prefix and a name with exactly one `/`.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Identity and derived metadata of a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkItemId {
    Unit,
    Frame {
        key: String,
        frame_no: u64,
        timestamp_ms: u64,
    },
    Page {
        page_no: u32,
    },
    Subtask {
        id: SubtaskId,
    },
}

/// One addressable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub index: usize,
    #[serde(flatten)]
    pub id: WorkItemId,
    /// Populated once a worker reports back; `None` while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
}

impl WorkItem {
    pub fn new(index: usize, id: WorkItemId) -> Self {
        Self {
            index,
            id,
            result: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// Ordered, 0-indexed description of the total work of an episode.
///
/// Built once and persisted; later invocations reuse it verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkManifest {
    items: Vec<WorkItem>,
}

impl WorkManifest {
    pub fn from_ids(ids: impl IntoIterator<Item = WorkItemId>) -> Self {
        let items = ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| WorkItem::new(index, id))
            .collect();
        Self { items }
    }

    pub fn counted(total: usize) -> Self {
        Self::from_ids((0..total).map(|_| WorkItemId::Unit))
    }

    pub fn frames(capture: &FrameCapture) -> Result<Self, EngineError> {
        capture.validate()?;
        Ok(Self::from_ids(
            (0..capture.num_frames).map(|idx| capture.item(idx)),
        ))
    }

    /// Pages are numbered from 1.
    pub fn pages(num_pages: u32) -> Self {
        Self::from_ids((1..=num_pages).map(|page_no| WorkItemId::Page { page_no }))
    }

    pub fn subtasks(ids: &[SubtaskId]) -> Self {
        Self::from_ids(ids.iter().cloned().map(|id| WorkItemId::Subtask { id }))
    }

    /// Derive a frame manifest from listed artifact keys.
    ///
    /// Keys that are not frame captures are skipped; frames are ordered by
    /// frame number.
    pub fn from_frame_listing<'a>(
        keys: impl IntoIterator<Item = &'a str>,
        framerate: f64,
        numerator: u32,
        denominator: u32,
    ) -> Result<Self, EngineError> {
        validate_rate(framerate, numerator, denominator)?;

        let mut frames: Vec<WorkItemId> = keys
            .into_iter()
            .filter_map(|key| {
                let capture_idx = FrameCapture::parse_artifact_name(key)?;
                let (frame_no, timestamp_ms) = FrameCapture::frame_no_and_timestamp(
                    capture_idx,
                    framerate,
                    numerator,
                    denominator,
                );
                Some(WorkItemId::Frame {
                    key: key.to_string(),
                    frame_no,
                    timestamp_ms,
                })
            })
            .collect();

        frames.sort_by_key(|id| match id {
            WorkItemId::Frame { frame_no, key, .. } => (*frame_no, key.clone()),
            _ => (0, String::new()),
        });

        Ok(Self::from_ids(frames))
    }

    /// Build a manifest that does not need durable storage.
    pub fn build(spec: &ManifestSpec) -> Result<Self, EngineError> {
        match spec {
            ManifestSpec::Count { total } => Ok(Self::counted(*total)),
            ManifestSpec::Frames(capture) => Self::frames(capture),
            ManifestSpec::Pages { num_pages } => Ok(Self::pages(*num_pages)),
            ManifestSpec::Subtasks { ids } => Ok(Self::subtasks(ids)),
            ManifestSpec::FrameListing { .. } => Err(EngineError::manifest(
                "frame listing manifests must be derived from storage",
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&WorkItem> {
        self.items.get(index)
    }

    /// Attach a reported result to the item at `index`.
    pub fn record_result(&mut self, index: usize, result: JsonValue) -> bool {
        match self.items.get_mut(index) {
            Some(item) => {
                item.result = Some(result);
                true
            }
            None => false,
        }
    }

    /// Items in `range`, clamped to the manifest.
    pub fn slice(&self, range: Range<usize>) -> &[WorkItem] {
        let end = range.end.min(self.items.len());
        let start = range.start.min(end);
        &self.items[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(num_frames: usize) -> FrameCapture {
        FrameCapture {
            prefix: "media/frames/".to_string(),
            num_frames,
            framerate: 29.97,
            numerator: 1,
            denominator: 1,
        }
    }

    #[test]
    fn frame_numbers_follow_capture_rate() {
        // One capture per second of a 29.97fps video.
        assert_eq!(FrameCapture::frame_no_and_timestamp(0, 29.97, 1, 1), (0, 0));
        assert_eq!(FrameCapture::frame_no_and_timestamp(1, 29.97, 1, 1), (30, 1001));
        assert_eq!(FrameCapture::frame_no_and_timestamp(10, 29.97, 1, 1), (300, 10010));

        // Two captures per second of a 25fps video.
        assert_eq!(FrameCapture::frame_no_and_timestamp(3, 25.0, 2, 1), (38, 1520));
    }

    #[test]
    fn artifact_names_are_zero_padded_and_parse_back() {
        assert_eq!(FrameCapture::artifact_name(42), "frame.0000042.jpg");
        assert_eq!(FrameCapture::parse_artifact_name("a/b/frame.0000042.jpg"), Some(42));
        assert_eq!(FrameCapture::parse_artifact_name("a/b/frame.jpg"), None);
        assert_eq!(FrameCapture::parse_artifact_name("a/b/frame.12x.jpg"), None);
        assert_eq!(FrameCapture::parse_artifact_name("a/b/frameHash.json"), None);
    }

    #[test]
    fn frames_manifest_addresses_every_capture() {
        let manifest = WorkManifest::frames(&capture(3)).unwrap();
        assert_eq!(manifest.len(), 3);
        assert_eq!(
            manifest.get(2).unwrap().id,
            WorkItemId::Frame {
                key: "media/frames/frame.0000002.jpg".to_string(),
                frame_no: 60,
                timestamp_ms: 2002,
            }
        );
        assert!(manifest.items().iter().all(WorkItem::is_pending));
    }

    #[test]
    fn invalid_capture_rate_fails_construction() {
        let mut bad = capture(3);
        bad.numerator = 0;
        assert!(matches!(WorkManifest::frames(&bad), Err(EngineError::Manifest(_))));
    }

    #[test]
    fn listing_skips_foreign_objects_and_sorts_by_frame() {
        let keys = [
            "p/frame.0000002.jpg",
            "p/frameHash.json",
            "p/frame.0000000.jpg",
            "p/thumbnail.jpg",
            "p/frame.0000001.jpg",
        ];
        let manifest = WorkManifest::from_frame_listing(keys, 30.0, 1, 1).unwrap();

        let ordered: Vec<_> = manifest
            .items()
            .iter()
            .map(|item| match &item.id {
                WorkItemId::Frame { key, .. } => key.as_str(),
                other => panic!("unexpected item {other:?}"),
            })
            .collect();
        assert_eq!(
            ordered,
            ["p/frame.0000000.jpg", "p/frame.0000001.jpg", "p/frame.0000002.jpg"]
        );
        assert_eq!(manifest.get(1).unwrap().index, 1);
    }

    #[test]
    fn pages_are_one_based() {
        let manifest = WorkManifest::pages(3);
        assert_eq!(manifest.get(0).unwrap().id, WorkItemId::Page { page_no: 1 });
        assert_eq!(manifest.get(2).unwrap().id, WorkItemId::Page { page_no: 3 });
    }

    #[test]
    fn slice_is_clamped() {
        let manifest = WorkManifest::counted(10);
        assert_eq!(manifest.slice(8..20).len(), 2);
        assert!(manifest.slice(12..20).is_empty());
    }

    #[test]
    fn work_item_serializes_flat() {
        let item = WorkItem::new(
            4,
            WorkItemId::Page { page_no: 5 },
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json, serde_json::json!({"index": 4, "type": "page", "page_no": 5}));

        let back: WorkItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn join_key_normalises_slashes() {
        assert_eq!(join_key("a/b/", "c.json"), "a/b/c.json");
        assert_eq!(join_key("a/b", "c.json"), "a/b/c.json");
        assert_eq!(join_key("", "c.json"), "c.json");
    }
}
