//! Duplicate suppression for captured errors
//!
//! A crash loop or an error logged every frame would otherwise produce one
//! `app_exception` event per occurrence. Each distinct condition and stack
//! trace is reported once per process.

use std::collections::HashSet;

use crate::types::LogSignal;

/// Set of exception signatures already reported this process.
#[derive(Debug, Default)]
pub struct ExceptionDeduper {
    seen: HashSet<String>,
}

impl ExceptionDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature of a signal: condition and stack trace joined by a newline.
    pub fn signature(signal: &LogSignal) -> String {
        format!("{}\n{}", signal.condition, signal.stack_trace)
    }

    pub fn seen(&self, signature: &str) -> bool {
        self.seen.contains(signature)
    }

    pub fn record(&mut self, signature: String) {
        self.seen.insert(signature);
    }

    /// Record the signal, returning `true` the first time it is observed.
    pub fn observe(&mut self, signal: &LogSignal) -> bool {
        let signature = Self::signature(signal);
        if self.seen(&signature) {
            return false;
        }
        self.record(signature);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
