//! Cross-thread dispatch onto the coordination thread
//!
//! Background work (identifier resolution, attribution callbacks, delivery
//! reports, panic hooks) never touches client state directly. It enqueues a
//! job here, and the coordination thread runs queued jobs once per tick with
//! exclusive access to the state owner.
//!
//! ```
//! use gameevents_core::dispatcher::Dispatcher;
//!
//! let dispatcher: Dispatcher<Vec<u32>> = Dispatcher::new();
//! let remote = dispatcher.clone();
//! std::thread::spawn(move || remote.enqueue(|log: &mut Vec<u32>| log.push(1)))
//!     .join()
//!     .unwrap();
//!
//! let mut log = Vec::new();
//! assert_eq!(dispatcher.drain(&mut log), 1);
//! assert_eq!(log, vec![1]);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A unit of work run on the coordination thread.
pub type Job<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

/// Thread-safe FIFO of jobs drained by a single consumer.
///
/// Cloning yields another handle to the same queue.
pub struct Dispatcher<T> {
    queue: Arc<Mutex<Vec<Job<T>>>>,
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a job. Callable from any thread.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(job));
    }

    /// Run every job queued before this call, in enqueue order.
    ///
    /// The pending jobs are swapped out under the lock and run after it is
    /// released, so a job may enqueue more work; that work runs on the next
    /// drain. Returns the number of jobs run.
    pub fn drain(&self, target: &mut T) -> usize {
        let jobs = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let count = jobs.len();
        for job in jobs {
            job(target);
        }
        count
    }

    /// Number of jobs waiting for the next drain
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}
