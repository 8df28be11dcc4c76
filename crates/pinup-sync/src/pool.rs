//! Bounded-concurrency job pool.
//!
//! Jobs are admitted in FIFO order while fewer than `max_concurrency` are
//! running. `submit` never blocks; excess jobs wait in the queue. A failing
//! or panicking job is logged, recorded, and frees its slot like any other.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::PoolError;

/// A deferred unit of work. Nothing runs until the pool admits it.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct PoolState {
    queue: VecDeque<Job>,
    running: usize,
    errors: Vec<String>,
}

struct PoolInner {
    max_concurrency: usize,
    state: Mutex<PoolState>,
    /// Running plus queued job count, published on every change
    outstanding: watch::Sender<usize>,
}

#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

impl TaskPool {
    /// A ceiling of zero is raised to one.
    pub fn new(max_concurrency: usize) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(PoolInner {
                max_concurrency: max_concurrency.max(1),
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    running: 0,
                    errors: Vec::new(),
                }),
                outstanding,
            }),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    pub fn running(&self) -> usize {
        self.lock().running
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Enqueue a job and start it immediately if a slot is free.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job: Job = Box::new(move || job().boxed());
        {
            let mut state = self.lock();
            state.queue.push_back(job);
            self.publish(&state);
        }
        self.admit();
    }

    /// Wait until nothing is running or queued, including jobs submitted
    /// while waiting. Failures recorded since the last call are drained
    /// into the returned error.
    pub async fn await_idle(&self) -> Result<(), PoolError> {
        let mut rx = self.inner.outstanding.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await.map(|_| ());

        let errors = std::mem::take(&mut self.lock().errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError::JobsFailed(errors))
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &PoolState) {
        self.inner
            .outstanding
            .send_replace(state.running + state.queue.len());
    }

    fn admit(&self) {
        let mut admitted = Vec::new();
        {
            let mut state = self.lock();
            while state.running < self.inner.max_concurrency {
                match state.queue.pop_front() {
                    Some(job) => {
                        state.running += 1;
                        admitted.push(job);
                    }
                    None => break,
                }
            }
            if !admitted.is_empty() {
                debug!(
                    admitted = admitted.len(),
                    running = state.running,
                    queued = state.queue.len(),
                    "admitting jobs"
                );
            }
        }

        for job in admitted {
            let pool = self.clone();
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(job()).catch_unwind().await;
                pool.complete(outcome);
            });
        }
    }

    fn complete(&self, outcome: Result<anyhow::Result<()>, Box<dyn Any + Send>>) {
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                error!("pool job failed: {e:#}");
                Some(format!("{e:#}"))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!("pool job panicked: {msg}");
                Some(format!("panicked: {msg}"))
            }
        };

        {
            let mut state = self.lock();
            state.running -= 1;
            state.errors.extend(failure);
            self.publish(&state);
        }
        self.admit();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
