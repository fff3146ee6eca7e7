//! The phase-barrier worker pool.

use std::sync::{
    Arc, Condvar, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread;

use crate::task_queue::{self, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads that executes work in phases.
///
/// [`run_phase`](Self::run_phase) posts a batch of fallible tasks and blocks
/// until the whole batch has completed. The first task error aborts the
/// phase: tasks not yet started are skipped, and the error is returned to
/// the caller. Tasks within a phase run in an unspecified order and must
/// not depend on each other.
///
/// The pool itself is reused across phases; worker threads live until the
/// pool is dropped.
pub struct PhasePool {
    tx: Sender<Job>,
    num_threads: usize,
}

impl PhasePool {
    /// Creates a pool with `num_threads` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is 0.
    pub fn new(num_threads: usize) -> PhasePool {
        assert_ne!(num_threads, 0);
        let (tx, rx) = task_queue::channel::<Job>();
        for i in 0..num_threads {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("tileforge-worker-{i}"))
                .spawn(move || {
                    while let Some(job) = rx.recv() {
                        job();
                    }
                })
                .expect("spawn worker thread");
        }
        PhasePool { tx, num_threads }
    }

    /// Creates a pool sized to the machine's available parallelism
    /// (falling back to 4 threads when it cannot be determined).
    pub fn with_default_threads() -> PhasePool {
        let num_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        PhasePool::new(num_threads)
    }

    /// Number of worker threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.num_threads
    }

    /// Runs a batch of tasks to completion and returns the first error.
    ///
    /// Blocks the calling thread until every task has either run or been
    /// skipped because an earlier task failed. This is the phase barrier:
    /// when this returns `Ok(())`, every task of the batch has finished.
    pub fn run_phase<E, F>(&self, tasks: Vec<F>) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Send + 'static,
    {
        if tasks.is_empty() {
            return Ok(());
        }

        let batch = Arc::new(Batch::new(tasks.len()));
        for task in tasks {
            let batch = Arc::clone(&batch);
            self.tx.send(Box::new(move || {
                // Once any task has failed, the rest of the batch is moot.
                if !batch.failed.load(Ordering::Acquire) {
                    if let Err(e) = task() {
                        batch.record_error(e);
                    }
                }
                batch.task_done();
            }));
        }
        batch.wait();
        // The last worker may still hold its handle briefly after the
        // wake-up, so the error is taken out of the shared state rather
        // than by unwrapping the Arc.
        match batch.error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

}

/// Completion accounting for one phase batch.
struct Batch<E> {
    remaining: Mutex<usize>,
    done: Condvar,
    failed: AtomicBool,
    error: Mutex<Option<E>>,
}

impl<E> Batch<E> {
    fn new(count: usize) -> Batch<E> {
        Batch {
            remaining: Mutex::new(count),
            done: Condvar::new(),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    fn record_error(&self, e: E) {
        let mut error = self.error.lock().unwrap();
        if error.is_none() {
            *error = Some(e);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn task_done(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining -= 1;
        if *remaining == 0 {
            drop(remaining);
            self.done.notify_all();
        }
    }

    fn wait(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        while *remaining != 0 {
            remaining = self.done.wait(remaining).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PhasePool;
    use std::sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    #[should_panic]
    fn test_zero_threads() {
        PhasePool::new(0);
    }

    #[test]
    fn test_empty_phase() {
        let pool = PhasePool::new(2);
        let result: Result<(), ()> = pool.run_phase(Vec::<fn() -> Result<(), ()>>::new());
        assert!(result.is_ok());
    }

    #[test]
    fn test_all_tasks_run_before_return() {
        let pool = PhasePool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let counter = counter.clone();
                move || -> Result<(), ()> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();
        pool.run_phase(tasks).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_first_error_is_returned() {
        let pool = PhasePool::new(2);
        let tasks: Vec<_> = (0..10)
            .map(|i| move || if i == 3 { Err("task 3 failed") } else { Ok(()) })
            .collect();
        let err = pool.run_phase(tasks).unwrap_err();
        assert_eq!(err, "task 3 failed");
    }

    #[test]
    fn test_failure_skips_queued_tasks() {
        let pool = PhasePool::new(1);
        let ran = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let ran = ran.clone();
                move || {
                    ran.lock().unwrap().push(i);
                    if i == 0 { Err(()) } else { Ok(()) }
                }
            })
            .collect();
        assert!(pool.run_phase(tasks).is_err());
        // With a single worker, task 0 fails before any later task starts.
        assert_eq!(*ran.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_phases_are_ordered() {
        let pool = PhasePool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let counter = counter.clone();
                move || -> Result<(), ()> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();
        pool.run_phase(tasks).unwrap();
        // Everything from phase one is visible before phase two starts.
        assert_eq!(counter.load(Ordering::SeqCst), 16);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let counter = counter.clone();
                move || -> Result<(), ()> {
                    assert!(counter.load(Ordering::SeqCst) >= 16);
                    Ok(())
                }
            })
            .collect();
        pool.run_phase(tasks).unwrap();
    }

    #[test]
    fn test_tasks_run_concurrently() {
        let pool = PhasePool::new(4);
        let barrier = Arc::new(Barrier::new(4));
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                move || -> Result<(), ()> {
                    // Deadlocks unless all four tasks run at once.
                    barrier.wait();
                    Ok(())
                }
            })
            .collect();
        pool.run_phase(tasks).unwrap();
    }

}
