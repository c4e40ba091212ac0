//! Reader/writer gate with in-place upgrade.
//!
//! Any number of readers or a single writer may be inside the gate. A reader
//! can turn itself into the writer; only one such upgrade may be pending at a
//! time, a second attempt is refused immediately.
//!
//! Fairness: a pending upgrade has priority. While it waits, new readers and
//! writers are held back so the upgrader cannot be starved by a stream of
//! incoming readers. There is no ordering among plain readers and writers.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct GateState {
    readers: usize,
    writer: bool,
    upgrading: bool,
}

/// Low level reader/writer/upgrade primitive used by object lock tokens.
///
/// The gate does not track ownership; callers must pair every `acquire_*`
/// with the matching `release_*`.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until shared access is granted
    pub fn acquire_read(&self) {
        let mut state = self.state.lock();
        while state.writer || state.upgrading {
            self.changed.wait(&mut state);
        }
        state.readers += 1;
    }

    /// Block until exclusive access is granted
    pub fn acquire_write(&self) {
        let mut state = self.state.lock();
        while state.writer || state.readers > 0 || state.upgrading {
            self.changed.wait(&mut state);
        }
        state.writer = true;
    }

    pub fn release_read(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0, "release_read without reader");
        state.readers = state.readers.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    pub fn release_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer, "release_write without writer");
        state.writer = false;
        drop(state);
        self.changed.notify_all();
    }

    /// Turn the caller's shared access into exclusive access.
    ///
    /// Returns false without waiting if another upgrade is already pending;
    /// the caller keeps its shared access in that case. Otherwise blocks until
    /// every other reader has left.
    pub fn upgrade(&self) -> bool {
        let mut state = self.state.lock();
        if state.upgrading {
            return false;
        }
        state.upgrading = true;
        while state.readers > 1 {
            self.changed.wait(&mut state);
        }
        state.readers = 0;
        state.upgrading = false;
        state.writer = true;
        true
    }

    /// Turn exclusive access back into shared access without letting a
    /// writer in between.
    pub fn downgrade(&self) {
        let mut state = self.state.lock();
        state.writer = false;
        state.readers += 1;
        drop(state);
        self.changed.notify_all();
    }

    /// Number of readers currently inside
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    /// Whether a writer is currently inside
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer
    }

    /// Whether an upgrade is waiting for readers to leave
    pub fn is_upgrading(&self) -> bool {
        self.state.lock().upgrading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_readers_share() {
        let gate = Gate::new();
        gate.acquire_read();
        gate.acquire_read();
        assert_eq!(gate.readers(), 2);
        gate.release_read();
        gate.release_read();
        assert_eq!(gate.readers(), 0);
    }

    #[test]
    fn test_writer_waits_for_readers() {
        let gate = Arc::new(Gate::new());
        let entered = Arc::new(AtomicBool::new(false));
        gate.acquire_read();

        let writer = {
            let gate = Arc::clone(&gate);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                gate.acquire_write();
                entered.store(true, Ordering::SeqCst);
                gate.release_write();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        gate.release_read();
        writer.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_second_upgrade_is_refused() {
        let gate = Arc::new(Gate::new());
        gate.acquire_read();
        gate.acquire_read();

        let first = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let upgraded = gate.upgrade();
                gate.release_write();
                upgraded
            })
        };

        // Wait until the first upgrade is pending
        while !gate.is_upgrading() {
            thread::yield_now();
        }
        assert!(!gate.upgrade());

        // Conflict resolution: the loser releases its shared access
        gate.release_read();
        assert!(first.join().unwrap());
        assert!(!gate.is_write_locked());
    }

    #[test]
    fn test_pending_upgrade_holds_back_new_readers() {
        let gate = Arc::new(Gate::new());
        gate.acquire_read();
        gate.acquire_read();

        let upgrader = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                assert!(gate.upgrade());
                thread::sleep(Duration::from_millis(20));
                gate.release_write();
            })
        };
        while !gate.is_upgrading() {
            thread::yield_now();
        }

        let late_reader_entered = Arc::new(AtomicBool::new(false));
        let late_reader = {
            let gate = Arc::clone(&gate);
            let flag = Arc::clone(&late_reader_entered);
            thread::spawn(move || {
                gate.acquire_read();
                flag.store(true, Ordering::SeqCst);
                gate.release_read();
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!late_reader_entered.load(Ordering::SeqCst));

        gate.release_read();
        upgrader.join().unwrap();
        late_reader.join().unwrap();
        assert!(late_reader_entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_downgrade_keeps_access() {
        let gate = Gate::new();
        gate.acquire_write();
        gate.downgrade();
        assert!(!gate.is_write_locked());
        assert_eq!(gate.readers(), 1);
        gate.release_read();
    }
}
