//! Pipeline scenarios against in-process gateway and pinning-service fakes.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pinup_core::types::{
    FileSource, Pin, PinListResponse, PinRequest, PinState, PinStatus, StageState, TaskContent,
    UploadResponse,
};
use pinup_sync::{
    ContentTree, Node, Notifier, Outcome, Pipeline, PipelineError, PoolError, SharedTree,
    TaskPool, TaskRegistry,
};
use pinup_transport::{PinTransport, ProgressFn, TransportError, UploadRequest, UploadTransport};

// ── Fakes ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeGateway {
    fail_names: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeGateway {
    fn failing(names: &[&str]) -> Self {
        Self {
            fail_names: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[async_trait]
impl UploadTransport for FakeGateway {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<ProgressFn>,
    ) -> Result<UploadResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_names.contains(&request.file_name) {
            return Err(TransportError::Status {
                url: "fake://gateway".into(),
                status: 500,
                body: "upload rejected".into(),
            });
        }

        let size = match &request.content {
            TaskContent::Memory(b) => b.len() as u64,
            TaskContent::File(p) => std::fs::metadata(p)?.len(),
        };
        if let Some(cb) = progress {
            cb(size, size);
        }
        Ok(UploadResponse {
            remote_name: request.file_name.clone(),
            content_id: format!("bafy-{}", request.file_name),
            size: size.to_string(),
        })
    }
}

#[derive(Default)]
struct FakePinService {
    fail_cids: Mutex<HashSet<String>>,
    requests: Mutex<Vec<PinRequest>>,
}

impl FakePinService {
    fn failing(cids: &[&str]) -> Self {
        Self {
            fail_cids: Mutex::new(cids.iter().map(|c| c.to_string()).collect()),
            ..Default::default()
        }
    }

    fn heal(&self) {
        self.fail_cids.lock().unwrap().clear();
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PinTransport for FakePinService {
    async fn pin(&self, request: PinRequest) -> Result<PinStatus, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_cids.lock().unwrap().contains(&request.cid) {
            return Err(TransportError::Status {
                url: "fake://pins".into(),
                status: 503,
                body: "pinning unavailable".into(),
            });
        }
        Ok(PinStatus {
            request_id: format!("req-{}", request.cid),
            status: PinState::Queued,
            created: "2024-01-01T00:00:00Z".into(),
            delegates: vec![],
            info: Default::default(),
            pin: Pin {
                cid: request.cid,
                name: Some(request.name),
                ..Default::default()
            },
        })
    }

    async fn list_pins(&self, _limit: usize) -> Result<PinListResponse, TransportError> {
        Ok(PinListResponse::default())
    }

    async fn remove_pin(&self, _request_id: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Stands in for a transport with a bug: every call panics.
struct PanickingTransport;

#[async_trait]
impl UploadTransport for PanickingTransport {
    async fn upload(
        &self,
        _request: UploadRequest,
        _progress: Option<ProgressFn>,
    ) -> Result<UploadResponse, TransportError> {
        panic!("gateway client bug")
    }
}

#[async_trait]
impl PinTransport for PanickingTransport {
    async fn pin(&self, _request: PinRequest) -> Result<PinStatus, TransportError> {
        panic!("pin client bug")
    }

    async fn list_pins(&self, _limit: usize) -> Result<PinListResponse, TransportError> {
        Ok(PinListResponse::default())
    }

    async fn remove_pin(&self, _request_id: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_error(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

struct Harness {
    gateway: Arc<FakeGateway>,
    pins: Arc<FakePinService>,
    notifier: Arc<RecordingNotifier>,
    pipeline: Pipeline,
}

impl Harness {
    fn new(gateway: FakeGateway, pins: FakePinService) -> Self {
        Self::with_tree(gateway, pins, ContentTree::new())
    }

    fn with_tree(gateway: FakeGateway, pins: FakePinService, tree: ContentTree) -> Self {
        let gateway = Arc::new(gateway);
        let pins = Arc::new(pins);
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new(
            gateway.clone(),
            pins.clone(),
            TaskRegistry::new(),
            SharedTree::new(tree),
            notifier.clone(),
        );
        Self {
            gateway,
            pins,
            notifier,
            pipeline,
        }
    }
}

fn files(names: &[&str]) -> Vec<FileSource> {
    names
        .iter()
        .map(|n| FileSource::from_bytes(*n, format!("contents of {n}")))
        .collect()
}

const EIGHT: [&str; 8] = [
    "f1.txt", "f2.txt", "f3.txt", "f4.txt", "f5.txt", "f6.txt", "f7.txt", "f8.txt",
];

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn eight_files_complete_under_ceiling_of_five() {
    let h = Harness::new(
        FakeGateway::slow(Duration::from_millis(20)),
        FakePinService::default(),
    );
    let pool = TaskPool::new(5);

    let ids = h.pipeline.submit_files(&pool, files(&EIGHT), Some("docs"));
    assert_eq!(ids.len(), 8);

    pool.await_idle().await.unwrap();

    assert!(h.gateway.peak.load(Ordering::SeqCst) <= 5);
    let registry = h.pipeline.registry();
    let summary = registry.summary();
    assert_eq!((summary.active, summary.succeeded, summary.failed), (0, 8, 0));

    for task in registry.succeeded() {
        assert_eq!(task.upload.state, StageState::Success);
        assert_eq!(task.pin.state, StageState::Success);
        assert_eq!(task.upload.progress, 100.0);
        assert!(task.content.is_none());
    }

    let tree = h.pipeline.tree().snapshot();
    assert_eq!(tree.file_count(), 8);
    for name in EIGHT {
        match tree.lookup(&format!("/docs/{name}")) {
            Some(Node::File(f)) => {
                assert_eq!(f.cid, format!("bafy-{name}"));
                assert_eq!(f.request_id, format!("req-bafy-{name}"));
            }
            other => panic!("expected file at /docs/{name}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn partial_upload_failure_is_classified_per_task() {
    let h = Harness::new(
        FakeGateway::failing(&["f2.txt", "f5.txt", "f7.txt"]),
        FakePinService::default(),
    );
    let pool = TaskPool::new(5);

    h.pipeline.submit_files(&pool, files(&EIGHT), Some("docs"));
    // Stage failures are recorded on tasks, not surfaced as job errors.
    pool.await_idle().await.unwrap();

    let registry = h.pipeline.registry();
    assert_eq!(registry.succeeded().len(), 5);
    let failed = registry.failed();
    assert_eq!(failed.len(), 3);
    for task in &failed {
        assert_eq!(task.upload.state, StageState::Fail);
        assert_eq!(task.pin.state, StageState::Wait);
        assert!(task.upload.response.is_none());
    }

    assert_eq!(h.pins.request_count(), 5);
    assert_eq!(h.pipeline.tree().snapshot().file_count(), 5);
}

#[tokio::test]
async fn pin_failure_keeps_upload_response() {
    let h = Harness::new(
        FakeGateway::default(),
        FakePinService::failing(&["bafy-a.txt"]),
    );
    let pool = TaskPool::new(2);

    let ids = h.pipeline.submit_files(&pool, files(&["a.txt"]), Some("docs"));
    pool.await_idle().await.unwrap();

    let task = h.pipeline.registry().get(ids[0]).unwrap();
    assert_eq!(task.upload.state, StageState::Success);
    assert_eq!(task.pin.state, StageState::Fail);
    assert_eq!(
        task.upload.response.as_ref().map(|r| r.content_id.as_str()),
        Some("bafy-a.txt")
    );
    assert_eq!(h.pipeline.registry().failed().len(), 1);
    assert!(h.pipeline.tree().lookup("/docs/a.txt").is_none());
}

#[tokio::test]
async fn repin_after_pin_failure_succeeds() {
    let h = Harness::new(
        FakeGateway::default(),
        FakePinService::failing(&["bafy-a.txt"]),
    );
    let pool = TaskPool::new(2);

    let ids = h.pipeline.submit_files(&pool, files(&["a.txt"]), Some("docs"));
    pool.await_idle().await.unwrap();
    assert_eq!(h.pipeline.registry().failed().len(), 1);

    h.pins.heal();
    h.pipeline.submit_repin(&pool, ids[0]).unwrap();
    pool.await_idle().await.unwrap();

    let registry = h.pipeline.registry();
    assert!(registry.failed().is_empty());
    assert_eq!(registry.succeeded().len(), 1);
    assert_eq!(h.pins.request_count(), 2);
    assert!(h.pipeline.tree().lookup("/docs/a.txt").is_some());
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test]
async fn repin_without_upload_response_notifies() {
    let h = Harness::new(FakeGateway::failing(&["a.txt"]), FakePinService::default());
    let pool = TaskPool::new(2);

    let ids = h.pipeline.submit_files(&pool, files(&["a.txt"]), None);
    pool.await_idle().await.unwrap();

    let err = h.pipeline.submit_repin(&pool, ids[0]).unwrap_err();
    assert!(matches!(err, PipelineError::MissingPrerequisite { .. }));
    pool.await_idle().await.unwrap();

    assert_eq!(h.pins.request_count(), 0);
    assert_eq!(h.pipeline.registry().failed().len(), 1);
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("a.txt"));
}

#[tokio::test]
async fn tree_conflict_is_reported_without_failing_task() {
    let mut tree = ContentTree::new();
    tree.insert("/docs", Node::file("docs", 1, "bafy-old", "req-old"))
        .unwrap();
    let h = Harness::with_tree(FakeGateway::default(), FakePinService::default(), tree);
    let pool = TaskPool::new(2);

    let ids = h.pipeline.submit_files(&pool, files(&["a.txt"]), Some("docs"));
    pool.await_idle().await.unwrap();

    let task = h.pipeline.registry().get(ids[0]).unwrap();
    assert!(task.is_fully_successful());
    assert_eq!(h.pipeline.registry().succeeded().len(), 1);

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("/docs"));
    assert!(!h.pipeline.tree().lookup("/docs").unwrap().is_folder());
}

#[tokio::test]
async fn no_target_leaves_tree_untouched() {
    let h = Harness::new(FakeGateway::default(), FakePinService::default());
    let pool = TaskPool::new(5);

    h.pipeline.submit_files(&pool, files(&["a.txt", "b.txt"]), None);
    pool.await_idle().await.unwrap();

    assert_eq!(h.pipeline.registry().succeeded().len(), 2);
    assert!(h.pipeline.tree().snapshot().walk().is_empty());
}

#[tokio::test]
async fn nested_relative_paths_land_under_target() {
    let h = Harness::new(FakeGateway::default(), FakePinService::default());
    let pool = TaskPool::new(5);

    let sources = vec![
        FileSource::from_bytes("pic.jpg", "jpeg").with_relative_path("album/2024/pic.jpg"),
        FileSource::from_bytes("notes.md", "md").with_relative_path("album/notes.md"),
    ];
    h.pipeline.submit_files(&pool, sources, Some("//photos/"));
    pool.await_idle().await.unwrap();

    let tree = h.pipeline.tree().snapshot();
    assert!(tree.lookup("/photos/album/2024/pic.jpg").is_some());
    assert!(tree.lookup("/photos/album/notes.md").is_some());
    assert_eq!(tree.total_size(), 6);
}

#[tokio::test]
async fn run_classifies_exactly_once() {
    let h = Harness::new(FakeGateway::default(), FakePinService::default());
    let task = pinup_core::types::Task::from_source(FileSource::from_bytes("a.txt", "x"), None);
    let id = h.pipeline.registry().insert(task);

    assert_eq!(h.pipeline.run(id).await.unwrap(), Outcome::Succeeded);
    assert!(matches!(
        h.pipeline.run(id).await,
        Err(PipelineError::UnknownTask(_))
    ));
    assert_eq!(h.pipeline.registry().succeeded().len(), 1);
}

fn panicking_pipeline(
    uploader: Arc<dyn UploadTransport>,
    pinner: Arc<dyn PinTransport>,
) -> Pipeline {
    Pipeline::new(
        uploader,
        pinner,
        TaskRegistry::new(),
        SharedTree::new(ContentTree::new()),
        Arc::new(RecordingNotifier::default()),
    )
}

#[tokio::test]
async fn panicking_upload_files_task_as_failed() {
    let pipeline = panicking_pipeline(
        Arc::new(PanickingTransport),
        Arc::new(FakePinService::default()),
    );
    let pool = TaskPool::new(2);

    let ids = pipeline.submit_files(&pool, files(&["a.txt", "b.txt"]), Some("docs"));
    let PoolError::JobsFailed(errors) = pool.await_idle().await.unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.contains("gateway client bug")));

    let registry = pipeline.registry();
    let summary = registry.summary();
    assert_eq!((summary.active, summary.succeeded, summary.failed), (0, 0, 2));
    for id in ids {
        let task = registry.get(id).unwrap();
        assert_eq!(task.upload.state, StageState::Fail);
        assert_eq!(task.pin.state, StageState::Wait);
    }
    assert!(pipeline.tree().snapshot().walk().is_empty());
}

#[tokio::test]
async fn panicking_pin_keeps_upload_and_allows_repin() {
    let pipeline = panicking_pipeline(
        Arc::new(FakeGateway::default()),
        Arc::new(PanickingTransport),
    );
    let pool = TaskPool::new(2);

    let ids = pipeline.submit_files(&pool, files(&["a.txt"]), None);
    assert!(pool.await_idle().await.is_err());

    let registry = pipeline.registry();
    assert!(registry.active().is_empty());
    let task = registry.get(ids[0]).unwrap();
    assert_eq!(task.upload.state, StageState::Success);
    assert_eq!(task.pin.state, StageState::Fail);
    assert_eq!(registry.failed().len(), 1);

    // Filed once, so it can be reactivated like any other pin failure.
    pipeline.submit_repin(&pool, ids[0]).unwrap();
    assert!(pool.await_idle().await.is_err());
    assert_eq!(registry.failed().len(), 1);
    assert!(!registry.is_active(ids[0]));
}
