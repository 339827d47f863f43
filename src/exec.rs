//! # Execution Module
//!
//! The fixed worker pool behind parallel scans. The façade dispatches
//! exactly one action at a time: every dispatch first waits for the pool
//! to drain, then hands each worker its own job and returns a handle that
//! collects the per-worker results in worker-index order.

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, unbounded};
use log::trace;
use threadpool::ThreadPool;

use crate::store::lock::ReadGuard;

/* DEFINITIONS */

/// One unit of work handed to a pool worker.
pub(crate) type Job<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;

/// A fixed-size pool of scan workers.
pub struct WorkerPool {
    pool: ThreadPool,
    size: usize,
}

/// The pending result of one dispatched parallel action. Collect it with
/// [`ActionHandle::wait_for_result`]; dropping the handle instead abandons
/// the results but lets the workers run to completion harmlessly.
pub struct ActionHandle<T> {
    results: Receiver<(usize, Result<T>)>,
    pending: usize,

    // Read hold on the scanned store, released once results are in.
    _guard: Option<ReadGuard>,
}

/* POOL IMPLEMENTATION */

impl WorkerPool {
    /// Returns a pool of `size` workers. `size` must be nonzero; a
    /// database configured with zero workers simply carries no pool.
    pub fn new(size: usize) -> Self {
        debug_assert!(size > 0);
        Self {
            pool: ThreadPool::new(size),
            size,
        }
    }

    /// Returns the number of workers in this pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Block until every queued job has finished and all workers are
    /// available again.
    pub fn drain(&self) {
        self.pool.join();
    }

    /// Dispatch one parallel action: wait out any in-flight action, then
    /// hand each job to a worker. `guard` is the read hold covering the
    /// scanned store for the duration of the action.
    pub(crate) fn dispatch<T>(
        &self,
        jobs: Vec<Job<T>>,
        guard: Option<ReadGuard>,
    ) -> ActionHandle<T>
    where
        T: Send + 'static,
    {
        self.drain();

        let pending = jobs.len();
        let (tx, rx) = unbounded();
        for (index, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            self.pool.execute(move || {
                trace!("scan worker {index} starting");
                let _ = tx.send((index, job()));
            });
        }

        ActionHandle {
            results: rx,
            pending,
            _guard: guard,
        }
    }
}

/* HANDLE IMPLEMENTATION */

impl<T> ActionHandle<T> {
    /// Block until every worker has reported, then return the per-worker
    /// results in worker-index order. The first worker error observed is
    /// returned instead, after all workers have finished.
    pub fn wait_for_result(self) -> Result<Vec<T>> {
        let mut parts: Vec<Option<T>> =
            (0..self.pending).map(|_| None).collect();

        let mut first_error = None;
        for _ in 0..self.pending {
            let (index, result) = self.results.recv().map_err(|_| {
                anyhow!("A scan worker terminated without reporting.")
            })?;

            match result {
                Ok(part) => parts[index] = Some(part),
                Err(e) => {
                    first_error.get_or_insert(e);
                },
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        parts
            .into_iter()
            .enumerate()
            .map(|(index, part)| {
                part.ok_or_else(|| {
                    anyhow!("Scan worker {index} never reported.")
                })
            })
            .collect()
    }
}
