//! A bounded worker pool with submit/await semantics.
//!
//! The unit of parallelism is one `(instruction, mutant)` task. Tasks own
//! their state and return a small structured result; nothing is shared
//! between them. Stage boundaries are barriers: the caller drains every
//! handle of one stage before dispatching the next, so round 2 can never
//! start consuming results round 1 has not durably produced.

use std::{
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{available_parallelism, JoinHandle},
};

use crate::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle of a submitted task; redeem it with [`TaskHandle::join`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task's result.
    ///
    /// Fails with [`Error::IllegalState`] when the task died without
    /// producing a result (a panic in the task body).
    pub fn join(self) -> Result<T, Error> {
        self.rx
            .recv()
            .map_err(|_| Error::illegal_state("task ended without a result"))
    }
}

/// A fixed-size pool of worker threads.
#[derive(Debug)]
pub struct TaskPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// A pool with one worker per available CPU.
    pub fn new() -> Self {
        Self::with_workers(available_parallelism().map_or(1, std::num::NonZeroUsize::get))
    }

    /// A pool with exactly `workers` workers (at least one).
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers)
            .map(|i| {
                let rx = Arc::clone(&rx);
                std::thread::Builder::new()
                    .name(format!("mutcheck-worker-{i}"))
                    .spawn(move || loop {
                        let job = {
                            let guard = rx.lock().expect("worker queue poisoned");
                            guard.recv()
                        };
                        match job {
                            Ok(job) => {
                                // contain panics so one bad task cannot
                                // take the worker down with it
                                let caught = std::panic::catch_unwind(
                                    std::panic::AssertUnwindSafe(job),
                                );
                                if caught.is_err() {
                                    log::warn!("a pool task panicked");
                                }
                            }
                            // the pool hung up; drain done
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Submit a task; returns immediately with its handle.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = channel();
        let job: Job = Box::new(move || {
            // a send can only fail when the handle was dropped, which
            // means nobody cares about this result
            drop(result_tx.send(task()));
        });
        self.tx
            .as_ref()
            .expect("pool already shut down")
            .send(job)
            .expect("all workers exited");
        TaskHandle { rx: result_rx }
    }

    /// Submit a whole stage and wait for every result: a stage barrier.
    pub fn run_stage<T, F, I>(&self, tasks: I) -> Vec<Result<T, Error>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let handles: Vec<_> = tasks.into_iter().map(|t| self.submit(t)).collect();
        handles.into_iter().map(TaskHandle::join).collect()
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // closing the channel lets the workers drain and exit
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            drop(worker.join());
        }
    }
}
