//! Fixed-size worker pool
//!
//! Callers hand off short jobs (queueing a message, packing a packet) so that
//! application-facing calls return without waiting on a send queue lock or
//! the socket. The pool is owned by whoever creates it; there is no global
//! executor.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::io;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small pool of named worker threads fed through a channel
pub struct TaskPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    /// Spawn `threads` workers named `<name>-<n>`
    pub fn new(name: &str, threads: usize) -> io::Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);

        for n in 0..threads.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, n))
                .spawn(move || {
                    // Drains queued jobs before exiting once the sender is gone
                    for job in rx.iter() {
                        job();
                    }
                })?;
            workers.push(handle);
        }

        debug!(pool = name, threads = workers.len(), "task pool started");
        Ok(TaskPool {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job, returning false if the pool was shut down
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Whether the pool still accepts jobs
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting jobs, let the workers finish the queue, and join them
    ///
    /// Safe to call from a worker thread (that worker is not joined) and safe
    /// to call more than once.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(pool = %self.name, "worker panicked");
            }
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run() {
        let pool = TaskPool::new("test", 3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = counter.clone();
            assert!(pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_execute_after_shutdown() {
        let pool = TaskPool::new("test", 1).unwrap();
        pool.shutdown();
        pool.shutdown();

        assert!(!pool.is_running());
        assert!(!pool.execute(|| {}));
    }
}
