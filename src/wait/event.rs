/*!
 * Manual-Reset Event
 * Signalable kernel object backed by eventfd
 */

use super::handle::Waitable;
use crate::core::errors::AwaitResult;
use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

/// Event that stays signaled from `set` until `reset`
pub struct Event {
    fd: EventFd,
}

impl Event {
    /// Create an event, optionally already signaled
    pub fn new(initially_set: bool) -> AwaitResult<Self> {
        let fd = EventFd::from_value_and_flags(
            u32::from(initially_set),
            EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK,
        )?;
        Ok(Self { fd })
    }

    /// Signal the event, waking every waiter
    pub fn set(&self) -> AwaitResult<()> {
        match self.fd.write(1) {
            // Counter saturated: already signaled
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Return the event to the unsignaled state
    pub fn reset(&self) -> AwaitResult<()> {
        match self.fd.read() {
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.is_signaled()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("fd", &self.as_raw_fd()).finish()
    }
}

impl AsFd for Event {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Event {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_fd().as_raw_fd()
    }
}

impl Waitable for Event {}
