//! Task registry: in-flight tasks plus the succeeded and failed lists.
//!
//! A task lives in exactly one place: the active map while its pipeline runs,
//! then one of the two completion lists. [`TaskRegistry::finish`] performs
//! that move and refuses to do it twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pinup_core::types::{PinStatus, StageState, Task, TaskContent, TaskId, UploadResponse};

use crate::error::PipelineError;

/// Where a finished task was filed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    pub active: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Inner {
    active: HashMap<TaskId, Task>,
    succeeded: Vec<Task>,
    failed: Vec<Task>,
}

impl Inner {
    fn active_mut(&mut self, id: TaskId) -> Result<&mut Task, PipelineError> {
        self.active
            .get_mut(&id)
            .ok_or(PipelineError::UnknownTask(id))
    }
}

/// Cloneable handle; all clones see the same registry.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, task: Task) -> TaskId {
        let id = task.id;
        self.lock().active.insert(id, task);
        id
    }

    /// Snapshot of a task wherever it currently lives.
    pub fn get(&self, id: TaskId) -> Option<Task> {
        let inner = self.lock();
        inner
            .active
            .get(&id)
            .or_else(|| inner.succeeded.iter().find(|t| t.id == id))
            .or_else(|| inner.failed.iter().find(|t| t.id == id))
            .cloned()
    }

    pub fn is_active(&self, id: TaskId) -> bool {
        self.lock().active.contains_key(&id)
    }

    /// Take the task's content, leaving `None` behind.
    pub fn take_content(&self, id: TaskId) -> Result<Option<TaskContent>, PipelineError> {
        Ok(self.lock().active_mut(id)?.content.take())
    }

    pub fn set_upload_state(&self, id: TaskId, state: StageState) -> Result<(), PipelineError> {
        self.lock().active_mut(id)?.upload.state = state;
        Ok(())
    }

    /// Clamped to 0..=100. Unknown tasks are ignored; progress callbacks
    /// can outlive the upload.
    pub fn set_upload_progress(&self, id: TaskId, percent: f64) {
        if let Ok(task) = self.lock().active_mut(id) {
            task.upload.progress = percent.clamp(0.0, 100.0);
        }
    }

    /// Store the gateway response and mark the upload successful.
    pub fn record_upload_success(
        &self,
        id: TaskId,
        response: UploadResponse,
    ) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        let task = inner.active_mut(id)?;
        task.upload.response = Some(response);
        task.upload.state = StageState::Success;
        task.upload.progress = 100.0;
        Ok(())
    }

    /// Pin state only leaves `Wait` after the upload succeeded.
    pub fn set_pin_state(&self, id: TaskId, state: StageState) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        let task = inner.active_mut(id)?;
        if state != StageState::Wait && task.upload.state != StageState::Success {
            return Err(PipelineError::PinBeforeUpload(id));
        }
        task.pin.state = state;
        Ok(())
    }

    pub fn record_pin_success(&self, id: TaskId, response: PinStatus) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        let task = inner.active_mut(id)?;
        if task.upload.state != StageState::Success {
            return Err(PipelineError::PinBeforeUpload(id));
        }
        task.pin.response = Some(response);
        task.pin.state = StageState::Success;
        Ok(())
    }

    /// Fail whichever stage was left in `Start` by a stage that never returned.
    pub fn fail_started_stages(&self, id: TaskId) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        let task = inner.active_mut(id)?;
        for state in [&mut task.upload.state, &mut task.pin.state] {
            if *state == StageState::Start {
                *state = StageState::Fail;
            }
        }
        Ok(())
    }

    /// Remove the task from the active map and file it by outcome.
    pub fn finish(&self, id: TaskId) -> Result<Outcome, PipelineError> {
        let mut inner = self.lock();
        let task = inner
            .active
            .remove(&id)
            .ok_or(PipelineError::UnknownTask(id))?;
        if task.is_fully_successful() {
            inner.succeeded.push(task);
            Ok(Outcome::Succeeded)
        } else {
            inner.failed.push(task);
            Ok(Outcome::Failed)
        }
    }

    /// Move a failed task back into the active map with its pin stage
    /// reset, ready for another pin attempt.
    ///
    /// Fails without touching the registry if the task is in flight or
    /// never got an upload response.
    pub fn reactivate_for_repin(&self, id: TaskId) -> Result<Task, PipelineError> {
        let mut inner = self.lock();
        if inner.active.contains_key(&id) {
            return Err(PipelineError::TaskActive(id));
        }
        let idx = inner
            .failed
            .iter()
            .position(|t| t.id == id)
            .ok_or(PipelineError::UnknownTask(id))?;
        if inner.failed[idx].upload.response.is_none() {
            return Err(PipelineError::MissingPrerequisite {
                id,
                name: inner.failed[idx].name.clone(),
            });
        }

        let mut task = inner.failed.remove(idx);
        task.pin = Default::default();
        inner.active.insert(id, task.clone());
        Ok(task)
    }

    pub fn active(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.lock().active.values().cloned().collect();
        tasks.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        tasks
    }

    pub fn succeeded(&self) -> Vec<Task> {
        self.lock().succeeded.clone()
    }

    pub fn failed(&self) -> Vec<Task> {
        self.lock().failed.clone()
    }

    pub fn summary(&self) -> RegistrySummary {
        let inner = self.lock();
        RegistrySummary {
            active: inner.active.len(),
            succeeded: inner.succeeded.len(),
            failed: inner.failed.len(),
        }
    }
}
