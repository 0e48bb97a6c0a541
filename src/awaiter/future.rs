/*!
 * Future Adapter
 *
 * Drives any `Awaitable` from a Rust executor. The first poll follows the
 * check-then-register pattern; the continuation flips a flag and wakes the
 * task through an `AtomicWaker`, so it is safe to fire from any thread,
 * before or after `on_completed` returns.
 */

use super::traits::Awaitable;
use crate::core::errors::AwaitResult;
use futures::task::AtomicWaker;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Default)]
struct Resume {
    fired: AtomicBool,
    waker: AtomicWaker,
}

/// Future resolving to an awaiter's result
#[must_use = "futures do nothing unless polled"]
pub struct AwaiterFuture<A: Awaitable> {
    awaiter: A,
    resume: Option<Arc<Resume>>,
    done: bool,
}

impl<A: Awaitable> AwaiterFuture<A> {
    pub fn new(awaiter: A) -> Self {
        Self {
            awaiter,
            resume: None,
            done: false,
        }
    }

    /// Borrow the wrapped awaiter
    pub fn awaiter(&self) -> &A {
        &self.awaiter
    }

    /// Whether the continuation has been registered with the awaiter
    pub fn is_registered(&self) -> bool {
        self.resume.is_some()
    }

    fn finish(&mut self) -> Poll<AwaitResult<A::Output>> {
        self.done = true;
        Poll::Ready(self.awaiter.try_get_result())
    }
}

impl<A: Awaitable + Unpin> Future for AwaiterFuture<A> {
    type Output = AwaitResult<A::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.done, "AwaiterFuture polled after completion");

        if let Some(resume) = &this.resume {
            resume.waker.register(cx.waker());
            if resume.fired.load(Ordering::Acquire) {
                return this.finish();
            }
            return Poll::Pending;
        }

        if this.awaiter.is_complete() {
            return this.finish();
        }

        let resume = Arc::new(Resume::default());
        resume.waker.register(cx.waker());
        this.resume = Some(resume.clone());

        let signal = resume.clone();
        if let Err(e) = this.awaiter.on_completed(Box::new(move || {
            signal.fired.store(true, Ordering::Release);
            signal.waker.wake();
        })) {
            this.done = true;
            return Poll::Ready(Err(e));
        }

        // The continuation may already have run inside on_completed
        if resume.fired.load(Ordering::Acquire) {
            return this.finish();
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::AwaitError;
    use crate::core::sync::Completion;
    use crate::core::types::Continuation;
    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    /// Awaiter completed by hand from the test body
    struct ManualAwaiter {
        completion: Arc<Completion<u32>>,
        fail_registration: bool,
    }

    impl ManualAwaiter {
        fn new() -> Self {
            Self {
                completion: Arc::new(Completion::new()),
                fail_registration: false,
            }
        }
    }

    impl Awaitable for ManualAwaiter {
        type Output = u32;

        fn is_complete(&self) -> bool {
            self.completion.is_completed()
        }

        fn on_completed(&self, continuation: Continuation) -> AwaitResult<()> {
            if self.fail_registration {
                return Err(AwaitError::os(libc::EBADF));
            }
            if !self.completion.on_completed(continuation) {
                return Err(AwaitError::Usage("already registered".into()));
            }
            Ok(())
        }

        fn try_get_result(&self) -> AwaitResult<u32> {
            self.completion
                .value()
                .copied()
                .ok_or_else(|| AwaitError::Usage("not complete".into()))
        }
    }

    #[test]
    fn test_ready_without_registration() {
        let awaiter = ManualAwaiter::new();
        awaiter.completion.complete(3);

        let mut fut = task::spawn(AwaiterFuture::new(awaiter));
        assert_eq!(assert_ready!(fut.poll()), Ok(3));
    }

    #[test]
    fn test_pending_then_woken() {
        let awaiter = ManualAwaiter::new();
        let completion = awaiter.completion.clone();

        let mut fut = task::spawn(AwaiterFuture::new(awaiter));
        assert_pending!(fut.poll());
        assert!(fut.is_registered());
        assert!(!fut.is_woken());

        completion.complete(11);
        assert!(fut.is_woken());
        assert_eq!(assert_ready!(fut.poll()), Ok(11));
    }

    #[test]
    fn test_completion_from_other_thread() {
        let awaiter = ManualAwaiter::new();
        let completion = awaiter.completion.clone();

        let mut fut = task::spawn(AwaiterFuture::new(awaiter));
        assert_pending!(fut.poll());

        std::thread::spawn(move || completion.complete(21))
            .join()
            .unwrap();

        assert!(fut.is_woken());
        assert_eq!(assert_ready!(fut.poll()), Ok(21));
    }

    #[test]
    fn test_registration_error_surfaces() {
        let mut awaiter = ManualAwaiter::new();
        awaiter.fail_registration = true;

        let mut fut = task::spawn(AwaiterFuture::new(awaiter));
        let result = assert_ready!(fut.poll());
        assert_eq!(result.unwrap_err().os_code(), Some(libc::EBADF));
    }

    #[test]
    #[should_panic(expected = "awaiter result unavailable")]
    fn test_get_result_before_completion_panics() {
        let awaiter = ManualAwaiter::new();
        let _ = awaiter.as_awaiter().get_result();
    }
}
