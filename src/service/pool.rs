//! Fixed-size pool of solver threads fed by a bounded queue.
//!
//! Submission never blocks: a full queue is reported back to the caller as
//! `SolveError::QueueFull`. Shutdown closes the queue, lets the workers drain
//! what is already queued, and joins them.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error};

use crate::error::SolveError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn start(workers: usize, queue_capacity: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("solver-worker-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    debug!("Solver worker {idx} stopped");
                })?;
            handles.push(handle);
        }

        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    pub fn try_submit(&self, job: Job) -> Result<(), SolveError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SolveError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(SolveError::ShuttingDown),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    pub fn shutdown(self) {
        // Workers drain queued jobs, then see the channel disconnect.
        drop(self.tx);
        for handle in self.workers {
            if handle.join().is_err() {
                error!("Solver worker panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_pool_runs_jobs_and_drains_on_shutdown() {
        let pool = WorkerPool::start(2, 16).expect("spawns");
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.try_submit(Box::new(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("queue has room");
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_try_submit_given_full_queue_should_return_queue_full() {
        let pool = WorkerPool::start(1, 1).expect("spawns");
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);

        pool.try_submit(Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .expect("first job accepted");
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker picked up the job");

        pool.try_submit(Box::new(|| {})).expect("one queue slot");
        let err = pool.try_submit(Box::new(|| {})).unwrap_err();
        assert_eq!(err, SolveError::QueueFull { capacity: 1 });

        drop(release_tx);
        pool.shutdown();
    }
}
