/*!
 * Waitable Handles
 *
 * Kernel objects that can be polled for a signaled state, and the handle
 * duplication service that makes them waitable independently of their
 * original owner.
 *
 * "Signaled" means the descriptor polls readable (or hung up): an eventfd
 * with a non-zero counter, a pidfd whose process has exited, a pipe with
 * data or a closed writer.
 */

use crate::core::errors::{AwaitError, AwaitResult};
use crate::core::types::{ceil_millis, deadline_after};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::time::{Duration, Instant};

/// Kernel object that can be waited on
pub trait Waitable: AsFd + Send + Sync + 'static {
    /// Block until signaled or until `timeout` elapses (`None` = forever)
    ///
    /// Returns `true` if signaled, `false` on timeout.
    fn wait_one(&self, timeout: Option<Duration>) -> AwaitResult<bool> {
        poll_readable(self.as_fd(), timeout)
    }

    /// Zero-timeout poll
    fn is_signaled(&self) -> bool {
        self.wait_one(Some(Duration::ZERO)).unwrap_or(false)
    }
}

/// Convert an optional relative timeout into a native poll timeout
///
/// Rounds up to whole milliseconds and saturates at the native maximum.
pub(crate) fn native_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(t) => PollTimeout::try_from(ceil_millis(t)).unwrap_or(PollTimeout::MAX),
    }
}

/// Poll a descriptor for readability
pub fn poll_readable(fd: BorrowedFd<'_>, timeout: Option<Duration>) -> AwaitResult<bool> {
    let deadline = deadline_after(Instant::now(), timeout);

    loop {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));

        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, native_timeout(remaining)) {
            Ok(0) => return Ok(false),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if revents.contains(PollFlags::POLLNVAL) {
                    return Err(Errno::EBADF.into());
                }
                return Ok(revents
                    .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR));
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Owned, independently waitable duplicate of a kernel handle
#[derive(Debug)]
pub struct NativeWaitHandle {
    fd: OwnedFd,
}

impl NativeWaitHandle {
    /// Take ownership of an existing descriptor
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Duplicate `source`, optionally inheritable by child processes
    pub fn duplicate<F: AsFd + ?Sized>(source: &F, inheritable: bool) -> AwaitResult<Self> {
        duplicate_handle(source, inheritable)
    }

    /// Whether the descriptor survives `exec` in child processes
    pub fn is_inheritable(&self) -> AwaitResult<bool> {
        // SAFETY: F_GETFD on a descriptor we own has no memory effects
        let flags = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_GETFD) };
        if flags < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(flags & libc::FD_CLOEXEC == 0)
    }

    pub fn into_owned_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for NativeWaitHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for NativeWaitHandle {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }
}

impl Waitable for NativeWaitHandle {}

/// Duplicate a kernel handle
///
/// The duplicate refers to the same kernel object and observes the same
/// signaled state. It belongs to the caller. Non-inheritable duplicates are
/// close-on-exec.
pub fn duplicate_handle<F: AsFd + ?Sized>(
    source: &F,
    inheritable: bool,
) -> AwaitResult<NativeWaitHandle> {
    let cmd = if inheritable {
        libc::F_DUPFD
    } else {
        libc::F_DUPFD_CLOEXEC
    };

    // SAFETY: fcntl duplicates a descriptor borrowed for the duration of the
    // call; the returned descriptor is fresh and owned by us
    let fd = unsafe { libc::fcntl(source.as_fd().as_raw_fd(), cmd, 0) };
    if fd < 0 {
        let err = io::Error::last_os_error();
        return Err(AwaitError::os(err.raw_os_error().unwrap_or(libc::EBADF)));
    }

    // SAFETY: fd was just returned by fcntl and is not owned elsewhere
    Ok(NativeWaitHandle::from_owned(unsafe { OwnedFd::from_raw_fd(fd) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_poll_readable_socket() {
        let (mut a, b) = UnixStream::pair().unwrap();
        assert!(!poll_readable(b.as_fd(), Some(Duration::ZERO)).unwrap());

        a.write_all(b"x").unwrap();
        assert!(poll_readable(b.as_fd(), Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn test_poll_timeout_not_early() {
        let (_a, b) = UnixStream::pair().unwrap();
        let start = Instant::now();
        assert!(!poll_readable(b.as_fd(), Some(Duration::from_millis(20))).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_duplicate_inheritability() {
        let (_a, b) = UnixStream::pair().unwrap();

        let private = duplicate_handle(&b, false).unwrap();
        assert!(!private.is_inheritable().unwrap());

        let shared = duplicate_handle(&b, true).unwrap();
        assert!(shared.is_inheritable().unwrap());
        assert_ne!(shared.as_raw_fd(), b.as_raw_fd());
    }
}
