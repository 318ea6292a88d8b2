//! Background task scheduler
//!
//! Recording, transcription, completion and synthesis run here so that the
//! frame loop never blocks. Submission is fire-and-forget.

use std::future::Future;
use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;

use crate::{Error, Result};

/// Runs dialogue work off the input thread
pub struct Scheduler {
    handle: Handle,
    tracker: TaskTracker,
    worker: Option<Worker>,
}

/// Dedicated runtime thread owned by a scheduler
struct Worker {
    shutdown: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl Scheduler {
    /// Start a scheduler on its own thread with its own event loop
    ///
    /// # Errors
    ///
    /// Returns error if the runtime or thread cannot be created
    pub fn dedicated() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("dialogue-scheduler")
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("dialogue-scheduler".to_string())
            .spawn(move || {
                tracing::debug!("scheduler loop started");
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                runtime.shutdown_background();
                tracing::debug!("scheduler loop stopped");
            })?;

        Ok(Self {
            handle,
            tracker: TaskTracker::new(),
            worker: Some(Worker { shutdown, thread }),
        })
    }

    /// Schedule onto the runtime the caller is already inside
    ///
    /// # Errors
    ///
    /// Returns error if called outside a Tokio runtime
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::Scheduler(e.to_string()))?;
        Ok(Self {
            handle,
            tracker: TaskTracker::new(),
            worker: None,
        })
    }

    /// Submit a task without waiting for it
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.tracker.spawn_on(task, &self.handle));
    }

    /// Number of submitted tasks that have not finished
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every submitted task has finished
    ///
    /// Must not be awaited from inside a scheduled task.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop the event loop; pending tasks are dropped
    pub fn shutdown(&mut self) {
        self.tracker.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            if worker.thread.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
