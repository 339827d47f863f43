//! # Access Lock Module
//!
//! The per-type readers/writer discipline: any number of concurrent
//! readers, one writer at a time, and no readers while a write is in
//! flight. A writer first publishes its intent (blocking new readers) and
//! then drains the readers that are already inside.
//!
//! Guards are owned rather than borrowed so that a parallel scan can hold
//! its read guard inside a result handle that outlives the dispatching
//! call frame.

use std::sync::{Arc, Condvar, Mutex};

/* DEFINITIONS */

/// Shared readers/writer state for one record type.
#[derive(Default, Debug)]
pub struct AccessLock {
    state: Mutex<State>,
    wake: Condvar,
}

#[derive(Default, Debug)]
struct State {
    readers: usize,
    writing: bool,
}

/// An owned shared-read guard. Dropping it releases the read hold.
pub struct ReadGuard {
    lock: Arc<AccessLock>,
}

/// An owned exclusive-write guard. Dropping it releases the write hold.
pub struct WriteGuard {
    lock: Arc<AccessLock>,
}

/* IMPLEMENTATION */

impl AccessLock {
    /// Returns a new, unheld lock.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until no write is in flight, then take a shared read hold.
    pub fn read(self: &Arc<Self>) -> ReadGuard {
        let mut state = self.state.lock().unwrap();
        while state.writing {
            state = self.wake.wait(state).unwrap();
        }
        state.readers += 1;

        ReadGuard { lock: self.clone() }
    }

    /// Block until no other write is in flight, publish write intent, then
    /// block until the readers already inside have drained.
    pub fn write(self: &Arc<Self>) -> WriteGuard {
        let mut state = self.state.lock().unwrap();
        while state.writing {
            state = self.wake.wait(state).unwrap();
        }
        state.writing = true;
        while state.readers > 0 {
            state = self.wake.wait(state).unwrap();
        }

        WriteGuard { lock: self.clone() }
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.readers -= 1;
        drop(state);
        self.lock.wake.notify_all();
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.writing = false;
        drop(state);
        self.lock.wake.notify_all();
    }
}
