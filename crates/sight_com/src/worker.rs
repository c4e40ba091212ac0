//! Worker threads
//!
//! A worker is an OS thread draining a FIFO task queue. Tasks posted to the
//! same worker run strictly in posting order; nothing is guaranteed across
//! workers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ComError, ComResult};

/// Boxed unit of work executed on a worker thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum WorkerCommand {
    Run(Task),
    Stop,
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a worker thread and its task queue.
pub struct Worker {
    name: String,
    task_tx: mpsc::UnboundedSender<WorkerCommand>,
    stopped: Arc<AtomicBool>,
    thread_id: ThreadId,
    thread_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Worker {
    /// Spawn a new worker thread.
    pub fn spawn(name: impl Into<String>) -> ComResult<Arc<Self>> {
        let name = name.into();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));

        let loop_name = name.clone();
        let loop_stopped = Arc::clone(&stopped);
        let thread_handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(loop_name, task_rx, loop_stopped))
            .map_err(|e| ComError::SpawnFailed(e.to_string()))?;

        tracing::debug!(worker = %name, "Worker spawned");

        Ok(Arc::new(Self {
            name,
            task_tx,
            stopped,
            thread_id: thread_handle.thread().id(),
            thread_handle: Mutex::new(Some(thread_handle)),
        }))
    }

    /// Worker name (also the OS thread name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the caller is running on this worker's thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Whether the worker no longer accepts tasks
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Queue a task without waiting for it.
    pub fn post<F>(&self, task: F) -> ComResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_stopped() {
            return Err(ComError::WorkerStopped(self.name.clone()));
        }
        self.task_tx
            .send(WorkerCommand::Run(Box::new(task)))
            .map_err(|_| ComError::WorkerStopped(self.name.clone()))
    }

    /// Queue a task and get a receiver for its result.
    ///
    /// The receiver can be awaited, or waited on with `blocking_recv()` from a
    /// thread that is not this worker.
    pub fn post_task<R, F>(&self, task: F) -> ComResult<oneshot::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move || {
            let _ = reply_tx.send(task());
        })?;
        Ok(reply_rx)
    }

    /// Stop accepting tasks, run the ones already queued, then exit.
    ///
    /// Joins the thread unless called from the worker itself.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.task_tx.send(WorkerCommand::Stop);

        if self.is_current() {
            return;
        }
        if let Some(handle) = self.thread_handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "Worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Main loop executed on the worker thread.
fn run_worker(
    name: String,
    mut task_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    stopped: Arc<AtomicBool>,
) {
    tracing::trace!(worker = %name, "Worker loop started");

    while let Some(cmd) = task_rx.blocking_recv() {
        match cmd {
            WorkerCommand::Run(task) => {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(worker = %name, "Task panicked on worker");
                }
            }
            WorkerCommand::Stop => break,
        }
    }

    stopped.store(true, Ordering::SeqCst);
    tracing::debug!(worker = %name, "Worker exiting");
}

// ─────────────────────────────────────────────────────────────────────────────
// Active Workers
// ─────────────────────────────────────────────────────────────────────────────

/// Name of the worker every unaffined service and slot falls back to
pub const DEFAULT_WORKER: &str = "sight.default";

/// Pool of named workers shared by a runtime.
pub struct ActiveWorkers {
    workers: RwLock<HashMap<String, Arc<Worker>>>,
}

impl Default for ActiveWorkers {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveWorkers {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Get a worker by name
    pub fn get(&self, name: &str) -> Option<Arc<Worker>> {
        self.workers.read().get(name).cloned()
    }

    /// Get a worker by name, spawning it on first use
    pub fn get_or_spawn(&self, name: &str) -> ComResult<Arc<Worker>> {
        if let Some(worker) = self.get(name) {
            return Ok(worker);
        }
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get(name) {
            return Ok(Arc::clone(worker));
        }
        let worker = Worker::spawn(name)?;
        workers.insert(name.to_string(), Arc::clone(&worker));
        Ok(worker)
    }

    /// The default worker
    pub fn default_worker(&self) -> ComResult<Arc<Worker>> {
        self.get_or_spawn(DEFAULT_WORKER)
    }

    /// Names of every live worker, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop and forget every worker
    pub fn clear(&self) {
        let drained: Vec<_> = self.workers.write().drain().collect();
        for (name, worker) in drained {
            tracing::debug!(worker = %name, "Stopping worker");
            worker.stop();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let worker = Worker::spawn("fifo").unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..100 {
            let tx = tx.clone();
            worker.post(move || tx.send(i).unwrap()).unwrap();
        }
        worker.stop();

        let received: Vec<i32> = rx.try_iter().collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_post_task_returns_result_from_worker_thread() {
        let worker = Worker::spawn("reply").unwrap();
        let current = Arc::clone(&worker);

        let rx = worker
            .post_task(move || (current.is_current(), 6 * 7))
            .unwrap();
        let (on_worker, value) = rx.blocking_recv().unwrap();

        assert!(on_worker);
        assert_eq!(value, 42);
        assert!(!worker.is_current());
    }

    #[test]
    fn test_post_after_stop_fails() {
        let worker = Worker::spawn("stopped").unwrap();
        worker.stop();
        assert!(worker.is_stopped());
        assert_eq!(
            worker.post(|| {}),
            Err(ComError::WorkerStopped("stopped".to_string()))
        );
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let worker = Worker::spawn("panics").unwrap();
        worker.post(|| panic!("boom")).unwrap();
        let rx = worker.post_task(|| 1).unwrap();
        assert_eq!(rx.blocking_recv().unwrap(), 1);
    }

    #[test]
    fn test_active_workers_reuse_by_name() {
        let pool = ActiveWorkers::new();
        let a = pool.get_or_spawn("io").unwrap();
        let b = pool.get_or_spawn("io").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        pool.default_worker().unwrap();
        assert_eq!(pool.names(), vec!["io".to_string(), DEFAULT_WORKER.to_string()]);

        pool.clear();
        assert!(a.is_stopped());
        assert!(pool.names().is_empty());
    }
}
