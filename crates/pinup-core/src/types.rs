use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier of one submitted file, stable for the task's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Progress of a single pipeline stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    /// Not started yet
    #[default]
    Wait,
    /// Request in flight
    Start,
    Success,
    Fail,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageState::Wait => "wait",
            StageState::Start => "start",
            StageState::Success => "success",
            StageState::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Body returned by the gateway's `/api/v0/add` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "Name")]
    pub remote_name: String,
    #[serde(rename = "Hash")]
    pub content_id: String,
    #[serde(rename = "Size")]
    pub size: String,
}

/// Remote pin lifecycle as reported by the pinning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinState {
    Queued,
    Pinning,
    Pinned,
    #[serde(alias = "fail")]
    Failed,
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PinState::Queued => "queued",
            PinState::Pinning => "pinning",
            PinState::Pinned => "pinned",
            PinState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pin object echoed back inside a [`PinStatus`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

/// Body returned by `POST /psa/pins` and listed by `GET /psa/pins`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinStatus {
    #[serde(rename = "requestid", alias = "requestId")]
    pub request_id: String,
    pub status: PinState,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub delegates: Vec<String>,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
    #[serde(default)]
    pub pin: Pin,
}

/// Payload for `POST /psa/pins`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRequest {
    pub cid: String,
    pub name: String,
}

impl PinRequest {
    pub fn from_upload(upload: &UploadResponse) -> Self {
        Self {
            cid: upload.content_id.clone(),
            name: upload.remote_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinListResponse {
    pub count: u64,
    #[serde(default)]
    pub results: Vec<PinStatus>,
}

/// Raw bytes backing a task, consumed by the upload stage
#[derive(Clone)]
pub enum TaskContent {
    Memory(Bytes),
    File(PathBuf),
}

impl fmt::Debug for TaskContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskContent::Memory(b) => write!(f, "Memory({} bytes)", b.len()),
            TaskContent::File(p) => write!(f, "File({})", p.display()),
        }
    }
}

/// A file picked by the user, before it becomes a [`Task`]
#[derive(Debug, Clone)]
pub struct FileSource {
    pub name: String,
    pub size: u64,
    /// Path relative to the picked directory's parent; the bare file name
    /// when a single file was picked.
    pub relative_path: String,
    pub content: TaskContent,
}

impl FileSource {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        Self {
            relative_path: name.clone(),
            size: data.len() as u64,
            name,
            content: TaskContent::Memory(data),
        }
    }

    /// Describe a local file. `relative_path` defaults to the file name.
    pub fn from_path(path: &Path, relative_path: Option<String>) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            relative_path: relative_path.unwrap_or_else(|| name.clone()),
            name,
            size: meta.len(),
            content: TaskContent::File(path.to_path_buf()),
        })
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = relative_path.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadStage {
    pub state: StageState,
    /// Percentage 0..=100
    pub progress: f64,
    pub response: Option<UploadResponse>,
}

#[derive(Debug, Clone, Default)]
pub struct PinStage {
    pub state: StageState,
    pub response: Option<PinStatus>,
}

/// One file moving through the upload → pin pipeline
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub size: u64,
    pub relative_path: String,
    /// Destination folder in the content tree
    pub target_path: Option<String>,
    /// Taken by the upload stage; `None` afterwards
    pub content: Option<TaskContent>,
    pub upload: UploadStage,
    pub pin: PinStage,
}

impl Task {
    pub fn from_source(source: FileSource, target_path: Option<String>) -> Self {
        Self {
            id: TaskId::new(),
            name: source.name,
            size: source.size,
            relative_path: source.relative_path,
            target_path,
            content: Some(source.content),
            upload: UploadStage::default(),
            pin: PinStage::default(),
        }
    }

    pub fn is_fully_successful(&self) -> bool {
        self.upload.state == StageState::Success && self.pin.state == StageState::Success
    }

    /// Tree path the file lands at, or `None` if the task has no target.
    /// Not normalized: repeated separators are left to the tree.
    pub fn destination(&self) -> Option<String> {
        self.target_path
            .as_ref()
            .map(|target| format!("/{}/{}", target, self.relative_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_response_wire_names() {
        let json = r#"{"Name":"a.txt","Hash":"bafy123","Size":"42"}"#;
        let res: UploadResponse = serde_json::from_str(json).unwrap();
        assert_eq!(res.remote_name, "a.txt");
        assert_eq!(res.content_id, "bafy123");
        assert_eq!(res.size, "42");
    }

    #[test]
    fn test_pin_status_accepts_both_request_id_spellings() {
        let lower = r#"{"requestid":"r1","status":"pinned","pin":{"cid":"bafy"}}"#;
        let camel = r#"{"requestId":"r2","status":"fail","pin":{"cid":"bafy"}}"#;

        let a: PinStatus = serde_json::from_str(lower).unwrap();
        let b: PinStatus = serde_json::from_str(camel).unwrap();

        assert_eq!(a.request_id, "r1");
        assert_eq!(a.status, PinState::Pinned);
        assert_eq!(b.request_id, "r2");
        assert_eq!(b.status, PinState::Failed);
    }

    #[test]
    fn test_new_task_starts_waiting() {
        let task = Task::from_source(FileSource::from_bytes("a.txt", "hi"), Some("docs".into()));
        assert_eq!(task.upload.state, StageState::Wait);
        assert_eq!(task.pin.state, StageState::Wait);
        assert_eq!(task.size, 2);
        assert!(task.content.is_some());
        assert!(!task.is_fully_successful());
        assert_eq!(task.destination().as_deref(), Some("/docs/a.txt"));
    }

    #[test]
    fn test_task_without_target_has_no_destination() {
        let task = Task::from_source(FileSource::from_bytes("a.txt", "hi"), None);
        assert!(task.destination().is_none());
    }

    #[test]
    fn test_from_path_reads_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, b"12345").unwrap();

        let src = FileSource::from_path(&path, None).unwrap();
        assert_eq!(src.name, "note.md");
        assert_eq!(src.relative_path, "note.md");
        assert_eq!(src.size, 5);

        let src = FileSource::from_path(&path, Some("notes/note.md".into())).unwrap();
        assert_eq!(src.relative_path, "notes/note.md");
    }
}
