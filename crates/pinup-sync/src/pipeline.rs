//! Upload → pin pipeline.
//!
//! Each submitted file becomes a [`Task`] in the registry and one job on the
//! [`TaskPool`]. The job uploads the content, pins the returned content id,
//! places the pinned file in the content tree when the task has a target
//! folder, then files the task as succeeded or failed.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use pinup_core::types::{FileSource, PinRequest, StageState, Task, TaskId, UploadResponse};
use pinup_transport::{PinTransport, ProgressFn, UploadRequest, UploadTransport};

use crate::error::PipelineError;
use crate::notify::Notifier;
use crate::pool::TaskPool;
use crate::registry::{Outcome, TaskRegistry};
use crate::tree::{normalize_path, Node, SharedTree};

#[derive(Clone)]
pub struct Pipeline {
    uploader: Arc<dyn UploadTransport>,
    pinner: Arc<dyn PinTransport>,
    registry: TaskRegistry,
    tree: SharedTree,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        uploader: Arc<dyn UploadTransport>,
        pinner: Arc<dyn PinTransport>,
        registry: TaskRegistry,
        tree: SharedTree,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            uploader,
            pinner,
            registry,
            tree,
            notifier,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    /// Register one task per file and enqueue its pipeline. Returns the
    /// task ids in submission order without waiting for any of them.
    pub fn submit_files(
        &self,
        pool: &TaskPool,
        files: Vec<FileSource>,
        target: Option<&str>,
    ) -> Vec<TaskId> {
        files
            .into_iter()
            .map(|file| {
                let task = Task::from_source(file, target.map(str::to_string));
                self.submit_task(pool, task)
            })
            .collect()
    }

    pub fn submit_task(&self, pool: &TaskPool, task: Task) -> TaskId {
        let id = self.registry.insert(task);
        let pipeline = self.clone();
        pool.submit(move || async move {
            pipeline
                .run(id)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        });
        id
    }

    /// Retry the pin stage of a failed task whose upload went through.
    ///
    /// Without a prior upload response the user is notified and nothing is
    /// enqueued.
    pub fn submit_repin(&self, pool: &TaskPool, id: TaskId) -> Result<(), PipelineError> {
        if let Err(e) = self.registry.reactivate_for_repin(id) {
            if matches!(e, PipelineError::MissingPrerequisite { .. }) {
                self.notifier.notify_error(&e.to_string());
            }
            return Err(e);
        }

        let pipeline = self.clone();
        pool.submit(move || async move {
            pipeline
                .run_repin(id)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        });
        Ok(())
    }

    /// Drive a registered task through both stages and classify it.
    /// Stage failures are recorded on the task, not returned.
    pub async fn run(&self, id: TaskId) -> Result<Outcome, PipelineError> {
        let staged = AssertUnwindSafe(self.upload_then_pin(id))
            .catch_unwind()
            .await;
        self.settle(id, staged)
    }

    /// Pin stage only, for a task reactivated by `submit_repin`.
    pub async fn run_repin(&self, id: TaskId) -> Result<Outcome, PipelineError> {
        let staged = AssertUnwindSafe(self.repin_stage(id)).catch_unwind().await;
        self.settle(id, staged)
    }

    /// Classify the task however its stages ended. A panicking stage files
    /// the task as failed before the panic is resumed for the pool to record.
    fn settle(
        &self,
        id: TaskId,
        staged: std::thread::Result<Result<(), PipelineError>>,
    ) -> Result<Outcome, PipelineError> {
        match staged {
            Ok(staged) => {
                let outcome = self.registry.finish(id);
                staged?;
                outcome
            }
            Err(panic) => {
                error!(task_id = %id, "pipeline stage panicked, filing task as failed");
                let filed = self
                    .registry
                    .fail_started_stages(id)
                    .and_then(|_| self.registry.finish(id));
                if let Err(e) = filed {
                    warn!(task_id = %id, "could not classify panicked task: {e}");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn upload_then_pin(&self, id: TaskId) -> Result<(), PipelineError> {
        if let Some(upload) = self.upload_stage(id).await? {
            self.pin_stage(id, &upload).await?;
        }
        Ok(())
    }

    async fn repin_stage(&self, id: TaskId) -> Result<(), PipelineError> {
        let task = self
            .registry
            .get(id)
            .ok_or(PipelineError::UnknownTask(id))?;
        match &task.upload.response {
            Some(upload) => self.pin_stage(id, upload).await,
            None => {
                let err = PipelineError::MissingPrerequisite {
                    id,
                    name: task.name.clone(),
                };
                self.notifier.notify_error(&err.to_string());
                Ok(())
            }
        }
    }

    async fn upload_stage(&self, id: TaskId) -> Result<Option<UploadResponse>, PipelineError> {
        let task = self
            .registry
            .get(id)
            .ok_or(PipelineError::UnknownTask(id))?;
        self.registry.set_upload_state(id, StageState::Start)?;

        let Some(content) = self.registry.take_content(id)? else {
            warn!(task_id = %id, name = %task.name, "task has no content to upload");
            self.registry.set_upload_state(id, StageState::Fail)?;
            return Ok(None);
        };

        let progress: ProgressFn = {
            let registry = self.registry.clone();
            Arc::new(move |sent: u64, total: u64| {
                let percent = if total == 0 {
                    100.0
                } else {
                    sent as f64 * 100.0 / total as f64
                };
                registry.set_upload_progress(id, percent);
            })
        };

        let request = UploadRequest {
            file_name: task.name.clone(),
            content,
        };
        match self.uploader.upload(request, Some(progress)).await {
            Ok(response) => {
                self.registry.record_upload_success(id, response.clone())?;
                Ok(Some(response))
            }
            Err(e) => {
                warn!(task_id = %id, name = %task.name, "upload failed: {e}");
                self.registry.set_upload_state(id, StageState::Fail)?;
                Ok(None)
            }
        }
    }

    async fn pin_stage(&self, id: TaskId, upload: &UploadResponse) -> Result<(), PipelineError> {
        self.registry.set_pin_state(id, StageState::Start)?;

        match self.pinner.pin(PinRequest::from_upload(upload)).await {
            Ok(status) => {
                let request_id = status.request_id.clone();
                self.registry.record_pin_success(id, status)?;
                if let Some(task) = self.registry.get(id) {
                    self.place_in_tree(&task, upload, &request_id);
                }
                info!(task_id = %id, cid = %upload.content_id, request_id = %request_id, "pinned");
                Ok(())
            }
            Err(e) => {
                warn!(task_id = %id, cid = %upload.content_id, "pin failed: {e}");
                self.registry.set_pin_state(id, StageState::Fail)
            }
        }
    }

    /// A tree conflict is reported but does not fail the task; the content
    /// is already pinned.
    fn place_in_tree(&self, task: &Task, upload: &UploadResponse, request_id: &str) {
        let Some(destination) = task.destination() else {
            return;
        };
        let path = normalize_path(&destination);
        let node = Node::file(&task.name, task.size, &upload.content_id, request_id);
        if let Err(e) = self.tree.insert(&path, node) {
            warn!(task_id = %task.id, path = %path, "could not place pinned file: {e}");
            self.notifier
                .notify_error(&format!("{}: could not place at {path}: {e}", task.name));
        }
    }
}
