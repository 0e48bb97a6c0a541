/*!
 * Handoff Cell
 *
 * Single-assignment cell with blocking take, built on parking_lot's Condvar.
 * One side publishes a value exactly once; the other side parks until it
 * appears instead of spinning.
 */

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Single-assignment blocking cell
pub struct Handoff<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

enum Slot<T> {
    Empty,
    Full(T),
    Taken,
}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    /// Publish the value
    ///
    /// Returns the value back if the cell was already assigned.
    pub fn put(&self, value: T) -> Result<(), T> {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Empty) {
            return Err(value);
        }
        *slot = Slot::Full(value);
        drop(slot);
        self.ready.notify_all();
        Ok(())
    }

    /// Block until the value is published, then take it
    ///
    /// Returns `None` if another caller already took it.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Empty) {
            self.ready.wait(&mut slot);
        }
        Self::take_full(&mut slot)
    }

    /// Like [`Handoff::take`] but gives up after `timeout`
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Empty) {
            let _ = self
                .ready
                .wait_while_for(&mut slot, |s| matches!(s, Slot::Empty), timeout);
        }
        Self::take_full(&mut slot)
    }

    /// Take the value if it is published, without blocking
    pub fn try_take(&self) -> Option<T> {
        Self::take_full(&mut self.slot.lock())
    }

    /// Whether a value has been published (taken or not)
    pub fn is_assigned(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Empty)
    }

    fn take_full(slot: &mut Slot<T>) -> Option<T> {
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Full(value) => Some(value),
            other => {
                *slot = other;
                None
            }
        }
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}
