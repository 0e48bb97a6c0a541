/*!
 * Process File Descriptor
 * Pollable handle to a process; signaled once the process has exited
 */

use crate::core::errors::{AwaitError, AwaitResult};
use crate::wait::Waitable;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Owned pidfd
#[derive(Debug)]
pub struct PidFd {
    pid: u32,
    fd: OwnedFd,
}

impl PidFd {
    /// Open a pidfd for `pid` (close-on-exec)
    ///
    /// The process must not have been reaped yet; a zombie child is fine.
    pub fn open(pid: u32) -> AwaitResult<Self> {
        let raw_pid = libc::pid_t::try_from(pid)
            .map_err(|_| AwaitError::UnsupportedOperation(format!("pid {} out of range", pid)))?;

        // SAFETY: pidfd_open takes a pid and flags and returns a new
        // descriptor or -1; no pointers are involved
        let ret = unsafe { libc::syscall(libc::SYS_pidfd_open, raw_pid, 0) };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        // SAFETY: the kernel returned a fresh descriptor owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(ret as RawFd) };
        Ok(Self { pid, fd })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl AsFd for PidFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PidFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Waitable for PidFd {}
