/*!
 * One-Shot Completion
 *
 * Single-fire latch carrying a result value and at most one continuation.
 *
 * # Design
 *
 * State moves PENDING -> COMPLETED when the first value is recorded, and
 * COMPLETED -> FIRED when the continuation runs. The second transition is a
 * compare-and-swap performed under the continuation slot lock, so whichever
 * side arrives last (value or continuation) runs the continuation, and only
 * once, no matter how many threads race to complete.
 */

use crate::core::types::Continuation;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const FIRED: u8 = 2;

/// Observable phase of a [`Completion`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// No result yet
    Pending,
    /// Result recorded, continuation not run (none registered yet)
    Completed,
    /// Continuation has run
    Fired,
}

/// Thread-safe one-shot completion cell
///
/// # Performance
///
/// - Lock-free result reads after completion
/// - The slot lock is only taken on registration and on completion
/// - Cache-line aligned to keep the state word away from neighbours
#[repr(C, align(64))]
pub struct Completion<T> {
    state: AtomicU8,
    value: OnceLock<T>,
    continuation: Mutex<Option<Continuation>>,
    registered: AtomicU8,
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            value: OnceLock::new(),
            continuation: Mutex::new(None),
            registered: AtomicU8::new(0),
        }
    }

    /// Record the result
    ///
    /// Returns `true` if this call supplied the value. Later calls are
    /// ignored, the first result is immutable.
    pub fn complete(&self, value: T) -> bool {
        if self.value.set(value).is_err() {
            return false;
        }
        self.state.store(COMPLETED, Ordering::SeqCst);
        self.try_fire();
        true
    }

    /// Register the continuation
    ///
    /// Runs it synchronously if the result is already present. Returns
    /// `false` without storing anything if a continuation was registered
    /// before.
    pub fn on_completed(&self, continuation: Continuation) -> bool {
        if self.registered.swap(1, Ordering::AcqRel) != 0 {
            return false;
        }
        *self.continuation.lock() = Some(continuation);
        self.try_fire();
        true
    }

    /// Drop a registered continuation that can no longer fire
    pub fn abandon(&self) -> bool {
        self.continuation.lock().take().is_some()
    }

    /// Result, if recorded
    #[inline]
    pub fn value(&self) -> Option<&T> {
        self.value.get()
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    #[inline]
    pub fn has_continuation(&self) -> bool {
        self.registered.load(Ordering::Acquire) != 0
    }

    pub fn state(&self) -> CompletionState {
        match self.state.load(Ordering::Acquire) {
            PENDING => CompletionState::Pending,
            COMPLETED => CompletionState::Completed,
            _ => CompletionState::Fired,
        }
    }

    fn try_fire(&self) {
        let continuation = {
            let mut slot = self.continuation.lock();
            if slot.is_none() {
                return;
            }
            if self
                .state
                .compare_exchange(COMPLETED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            slot.take()
        };

        // Run outside the lock: continuations may re-enter.
        if let Some(continuation) = continuation {
            continuation();
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("state", &self.state())
            .field("value", &self.value.get())
            .finish()
    }
}
