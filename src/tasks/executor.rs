//! Async Executor
//!
//! One bounded queue and one background worker per cluster. Submitting never
//! waits: when the queue is full the new task is discarded, which is fine for
//! the work that goes through here (replica writes and eviction batches)
//! because it is self-correcting.
//!
//! Tasks run strictly in submission order. A failing or panicking task is
//! reported and the worker moves on to the next one.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;

/// Default queue capacity per executor.
pub const DEFAULT_CAPACITY: usize = 100;

/// Runs the tasks pulled off an executor's queue.
#[async_trait]
pub trait TaskHandler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, task: T) -> Result<()>;
}

enum Message<T> {
    Run(T),
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Task counters of one executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub accepted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

fn try_submit<T>(sender: &mpsc::Sender<Message<T>>, counters: &Counters, task: T) -> bool {
    match sender.try_send(Message::Run(task)) {
        Ok(()) => {
            counters.accepted.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Full(_)) => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("executor queue full, task discarded");
            false
        }
        Err(TrySendError::Closed(_)) => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

// == Task Submitter ==
/// Handle used by the task handler itself to queue follow-up work.
///
/// Holds a weak reference to the queue, so it does not keep the worker alive
/// once the owning [`AsyncExecutor`] is gone.
pub struct TaskSubmitter<T> {
    sender: mpsc::WeakSender<Message<T>>,
    counters: Arc<Counters>,
}

impl<T> Clone for TaskSubmitter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T> TaskSubmitter<T> {
    /// Queues `task`, returning false if it was discarded.
    pub fn submit(&self, task: T) -> bool {
        match self.sender.upgrade() {
            Some(sender) => try_submit(&sender, &self.counters, task),
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

// == Async Executor ==
pub struct AsyncExecutor<T> {
    name: String,
    sender: mpsc::Sender<Message<T>>,
    worker: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl<T: Send + 'static> AsyncExecutor<T> {
    /// Spawns the worker. `build` receives a submitter for follow-up tasks
    /// and returns the handler the worker dispatches to.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<H, F>(name: impl Into<String>, capacity: usize, build: F) -> (Self, Arc<H>)
    where
        H: TaskHandler<T>,
        F: FnOnce(TaskSubmitter<T>) -> H,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());

        let handler = Arc::new(build(TaskSubmitter {
            sender: sender.downgrade(),
            counters: counters.clone(),
        }));

        let worker = tokio::spawn(run_worker(
            name.clone(),
            receiver,
            handler.clone(),
            counters.clone(),
        ));

        (
            Self {
                name,
                sender,
                worker,
                counters,
            },
            handler,
        )
    }

    /// Queues `task` without waiting. Returns false if it was discarded.
    pub fn submit(&self, task: T) -> bool {
        try_submit(&self.sender, &self.counters, task)
    }

    /// Waits until every task accepted before this call has run.
    pub async fn drain(&self) {
        let (done, finished) = oneshot::channel();
        if self.sender.send(Message::Barrier(done)).await.is_ok() {
            let _ = finished.await;
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }

    /// Closes the queue and waits for the worker to finish what it accepted.
    pub async fn shutdown(self) {
        let Self { name, sender, worker, .. } = self;
        drop(sender);
        if let Err(e) = worker.await {
            error!(executor = %name, error = %e, "worker did not shut down cleanly");
        }
    }
}

async fn run_worker<T, H>(
    name: String,
    mut receiver: mpsc::Receiver<Message<T>>,
    handler: Arc<H>,
    counters: Arc<Counters>,
) where
    T: Send + 'static,
    H: TaskHandler<T>,
{
    info!(executor = %name, "background worker started");

    while let Some(message) = receiver.recv().await {
        match message {
            Message::Run(task) => {
                match AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
                    Ok(Ok(())) => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(executor = %name, error = %e, "background task failed");
                    }
                    Err(_) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(executor = %name, "background task panicked");
                    }
                }
            }
            Message::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    info!(executor = %name, "background worker stopped");
}
