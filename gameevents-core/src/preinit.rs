//! Calls made before the client is ready
//!
//! The host may log events or set properties before `initialize` has run.
//! Those calls are captured here with owned copies of their arguments and
//! replayed, in the order they were made, exactly once when initialization
//! completes.

use std::collections::VecDeque;
use std::fmt;

/// A deferred call against the state owner `T`.
pub type Deferred<T> = Box<dyn FnOnce(&mut T) + 'static>;

/// FIFO of deferred calls that replays once and then stays inert.
pub struct PreInitQueue<T> {
    actions: VecDeque<Deferred<T>>,
    replayed: bool,
}

impl<T> PreInitQueue<T> {
    pub fn new() -> Self {
        Self {
            actions: VecDeque::new(),
            replayed: false,
        }
    }

    /// Capture a call for later replay.
    ///
    /// Returns `false` once the queue has replayed; the caller should then
    /// invoke the target directly.
    pub fn enqueue<F>(&mut self, action: F) -> bool
    where
        F: FnOnce(&mut T) + 'static,
    {
        if self.replayed {
            return false;
        }
        self.actions.push_back(Box::new(action));
        true
    }

    /// Replay every captured call against `target` in FIFO order.
    ///
    /// Only the first call replays; later calls log a warning and return 0.
    pub fn drain_and_replay(&mut self, target: &mut T) -> usize {
        if self.replayed {
            tracing::warn!("Pre-init queue already replayed, ignoring");
            return 0;
        }
        self.replayed = true;

        let mut count = 0;
        while let Some(action) = self.actions.pop_front() {
            action(target);
            count += 1;
        }

        if count > 0 {
            tracing::debug!(count, "Replayed calls made before initialization");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether the queue has replayed and now bypasses capture
    pub fn is_replayed(&self) -> bool {
        self.replayed
    }
}

impl<T> Default for PreInitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PreInitQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreInitQueue")
            .field("pending", &self.actions.len())
            .field("replayed", &self.replayed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    #[test]
    fn test_replays_in_fifo_order_across_kinds() {
        let mut queue: PreInitQueue<Recorder> = PreInitQueue::new();
        assert!(queue.enqueue(|r| r.calls.push("log:a".to_string())));
        assert!(queue.enqueue(|r| r.calls.push("prop:level".to_string())));
        assert!(queue.enqueue(|r| r.calls.push("props:cohort".to_string())));
        assert!(queue.enqueue(|r| r.calls.push("log:b".to_string())));
        assert_eq!(queue.len(), 4);

        let mut recorder = Recorder::default();
        assert_eq!(queue.drain_and_replay(&mut recorder), 4);
        assert_eq!(
            recorder.calls,
            vec!["log:a", "prop:level", "props:cohort", "log:b"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replay_happens_once() {
        let mut queue: PreInitQueue<Recorder> = PreInitQueue::new();
        queue.enqueue(|r| r.calls.push("first".to_string()));

        let mut recorder = Recorder::default();
        assert_eq!(queue.drain_and_replay(&mut recorder), 1);
        assert_eq!(queue.drain_and_replay(&mut recorder), 0);
        assert_eq!(recorder.calls.len(), 1);
    }

    #[test]
    fn test_inert_after_replay() {
        let mut queue: PreInitQueue<Recorder> = PreInitQueue::new();
        let mut recorder = Recorder::default();
        queue.drain_and_replay(&mut recorder);

        assert!(queue.is_replayed());
        assert!(!queue.enqueue(|r| r.calls.push("late".to_string())));
        assert!(queue.is_empty());
    }
}
