/*!
 * Core Types
 * Common types used across the crate
 */

use std::any::Any;
use std::future::{ready, Ready};
use std::time::{Duration, Instant};

/// Process exit code
pub type ExitCode = i32;

/// Identifier of a pooled wait registration
pub type RegistrationId = u64;

/// Work item executed once on some thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Continuation resumed when an awaiter completes
pub type Continuation = Job;

/// Exit code reported by an awaiter built on a closed process object
pub const EMPTY_EXIT_CODE: ExitCode = 0;

/// Immediately-ready future resolving to zero
///
/// Stands in where an already-completed integer task is needed; carries no
/// state and allocates nothing.
#[inline]
pub fn zero_completed() -> Ready<i32> {
    ready(0)
}

/// Absolute deadline for an optional relative timeout
///
/// `None` (infinite) and timeouts too large to represent both map to no
/// deadline.
#[inline]
pub fn deadline_after(now: Instant, timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| now.checked_add(t))
}

/// Round a duration up to whole milliseconds
///
/// Used for native timeouts with millisecond granularity so that a wait
/// never returns before its deadline.
#[inline]
pub fn ceil_millis(duration: Duration) -> Duration {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    Duration::from_millis(millis.min(u64::MAX as u128) as u64)
}

/// Human-readable message from a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
