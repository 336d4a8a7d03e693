//! Background execution for blocking work
//!
//! The coordination thread must never block. Blocking calls (platform
//! identifier lookups) are submitted through an [`Executor`], and their
//! results come back through the dispatcher.

/// A unit of blocking work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs blocking tasks off the coordination thread.
pub trait Executor: Send + Sync {
    fn spawn_blocking(&self, task: Task);
}

impl Executor for tokio::runtime::Handle {
    fn spawn_blocking(&self, task: Task) {
        // The join handle is dropped; results travel through the dispatcher.
        drop(tokio::runtime::Handle::spawn_blocking(self, task));
    }
}

/// Executor that runs each task on a fresh OS thread.
///
/// For hosts that do not run a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn_blocking(&self, task: Task) {
        let spawned = std::thread::Builder::new()
            .name("gameevents-blocking".to_string())
            .spawn(task);
        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to spawn background thread");
        }
    }
}
