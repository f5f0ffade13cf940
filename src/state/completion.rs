//! One-shot terminal outcome of an operation.

use crate::error::Result;

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Ready(Result<T>),
    Taken,
}

/// Outcome that is resolved exactly once and observed exactly once.
///
/// Resolving an already-resolved completion is a bug in the caller; it
/// trips a debug assertion and the second value is dropped.
#[derive(Debug)]
pub struct Completion<T> {
    slot: Slot<T>,
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    /// Create an unresolved completion.
    pub fn new() -> Self {
        Self {
            slot: Slot::Pending,
        }
    }

    /// True until the outcome is resolved.
    pub fn is_pending(&self) -> bool {
        matches!(self.slot, Slot::Pending)
    }

    /// Resolve the outcome. Returns `false` if it was already resolved.
    pub fn complete(&mut self, result: Result<T>) -> bool {
        debug_assert!(self.is_pending(), "completion resolved twice");
        if !self.is_pending() {
            tracing::warn!("dropping second outcome for an already completed operation");
            return false;
        }
        self.slot = Slot::Ready(result);
        true
    }

    /// Take the resolved outcome. Yields `Some` at most once.
    pub fn take(&mut self) -> Option<Result<T>> {
        match std::mem::replace(&mut self.slot, Slot::Taken) {
            Slot::Ready(result) => Some(result),
            Slot::Pending => {
                self.slot = Slot::Pending;
                None
            }
            Slot::Taken => None,
        }
    }
}
