//! Jobs
//!
//! A job is a progress and cancel-request object shared between a long running
//! task and whoever observes it. Cancellation is cooperative: the task polls
//! [`Job::is_canceled`] and bails out on its own.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::signal::Signal;

// ─────────────────────────────────────────────────────────────────────────────
// Job State
// ─────────────────────────────────────────────────────────────────────────────

/// Current state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobState {
    /// Created, not running yet
    Waiting = 0,
    /// Running
    Running = 1,
    /// Cancel requested while running
    Canceling = 2,
    /// Canceled
    Canceled = 3,
    /// Ran to completion
    Finished = 4,
}

impl JobState {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Waiting,
            1 => Self::Running,
            2 => Self::Canceling,
            3 => Self::Canceled,
            _ => Self::Finished,
        }
    }

    /// Check if the job can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Canceled | JobState::Finished)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Running => write!(f, "running"),
            JobState::Canceling => write!(f, "canceling"),
            JobState::Canceled => write!(f, "canceled"),
            JobState::Finished => write!(f, "finished"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job
// ─────────────────────────────────────────────────────────────────────────────

struct JobInner {
    name: String,
    done_work: AtomicU64,
    total_work: AtomicU64,
    state: AtomicU8,
    progressed: Signal<(u64, u64)>,
    state_changed: Signal<JobState>,
}

/// Cloneable handle to a job.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub fn new(name: impl Into<String>, total_work: u64) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(JobInner {
                progressed: Signal::named(format!("{name}.progressed")),
                state_changed: Signal::named(format!("{name}.state_changed")),
                name,
                done_work: AtomicU64::new(0),
                total_work: AtomicU64::new(total_work),
                state: AtomicU8::new(JobState::Waiting as u8),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn done_work(&self) -> u64 {
        self.inner.done_work.load(Ordering::SeqCst)
    }

    pub fn total_work(&self) -> u64 {
        self.inner.total_work.load(Ordering::SeqCst)
    }

    /// Emitted with `(done, total)` whenever progress changes
    pub fn progressed(&self) -> &Signal<(u64, u64)> {
        &self.inner.progressed
    }

    /// Emitted on every state transition
    pub fn state_changed(&self) -> &Signal<JobState> {
        &self.inner.state_changed
    }

    /// Mark the job as running. Returns false if it was not waiting.
    pub fn run(&self) -> bool {
        self.transition(&[JobState::Waiting], JobState::Running)
    }

    /// Report progress. Ignored once the job is canceled or finished.
    pub fn progress(&self, done: u64) {
        if self.is_canceled() || self.state().is_terminal() {
            return;
        }
        let done = done.min(self.total_work());
        let previous = self.inner.done_work.swap(done, Ordering::SeqCst);
        if previous != done {
            self.inner.progressed.emit((done, self.total_work()));
        }
    }

    /// Add to the amount of work done
    pub fn add_done_work(&self, amount: u64) {
        self.progress(self.done_work().saturating_add(amount));
    }

    /// Request cancellation.
    ///
    /// A waiting job is canceled right away. A running job moves to
    /// `Canceling` until the task acknowledges it with [`Job::finish`].
    pub fn cancel(&self) -> bool {
        if self.transition(&[JobState::Waiting], JobState::Canceled) {
            return true;
        }
        self.transition(&[JobState::Running], JobState::Canceling)
    }

    /// Whether cancellation was requested
    pub fn is_canceled(&self) -> bool {
        matches!(self.state(), JobState::Canceling | JobState::Canceled)
    }

    /// Called by the task when it returns.
    pub fn finish(&self) {
        if self.transition(&[JobState::Canceling], JobState::Canceled) {
            return;
        }
        if self.transition(&[JobState::Running, JobState::Waiting], JobState::Finished) {
            let total = self.total_work();
            if self.inner.done_work.swap(total, Ordering::SeqCst) != total {
                self.inner.progressed.emit((total, total));
            }
        }
    }

    fn transition(&self, from: &[JobState], to: JobState) -> bool {
        for state in from {
            if self
                .inner
                .state
                .compare_exchange(*state as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                tracing::debug!(job = %self.inner.name, from = %state, to = %to, "Job state changed");
                self.inner.state_changed.emit(to);
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("done_work", &self.done_work())
            .field("total_work", &self.total_work())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DispatchMode, Slot};
    use parking_lot::Mutex;

    #[test]
    fn test_progress_is_reported_and_clamped() {
        let job = Job::new("load", 10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let slot = Slot::new(move |p: (u64, u64)| sink.lock().push(p));
        let _c = job.progressed().connect(&slot, DispatchMode::Direct);

        assert!(job.run());
        job.progress(4);
        job.add_done_work(20);
        job.finish();

        assert_eq!(*seen.lock(), vec![(4, 10), (10, 10)]);
        assert_eq!(job.state(), JobState::Finished);
    }

    #[test]
    fn test_cancel_running_job_is_cooperative() {
        let job = Job::new("compute", 100);
        job.run();

        let worker_view = job.clone();
        assert!(job.cancel());
        assert!(worker_view.is_canceled());
        assert_eq!(job.state(), JobState::Canceling);

        worker_view.progress(50);
        assert_eq!(job.done_work(), 0);

        worker_view.finish();
        assert_eq!(job.state(), JobState::Canceled);
        assert!(!job.cancel());
    }

    #[test]
    fn test_cancel_waiting_job() {
        let job = Job::new("idle", 1);
        assert!(job.cancel());
        assert_eq!(job.state(), JobState::Canceled);
        assert!(!job.run());
    }
}
