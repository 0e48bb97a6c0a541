/*!
 * Wait Handle Awaiter
 *
 * Suspends on a waitable kernel object with an optional timeout. The result
 * is `true` if the object was signaled, `false` if the timeout won.
 *
 * Dropping an awaiter that has not completed cancels its pool registration,
 * so an abandoned future does not pin the handle until a signal arrives.
 */

use super::handle::Waitable;
use super::pool::{RegisteredWait, WaitPool};
use crate::awaiter::{Awaitable, AwaiterFuture};
use crate::core::errors::{AwaitError, AwaitResult};
use crate::core::sync::{Completion, Handoff};
use crate::core::types::Continuation;
use std::future::IntoFuture;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Awaiter over a waitable object
pub struct WaitHandleAwaiter {
    handle: Arc<dyn Waitable>,
    timeout: Option<Duration>,
    pool: Option<WaitPool>,
    completion: Arc<Completion<bool>>,
    registration: OnceLock<Arc<Handoff<RegisteredWait>>>,
}

impl WaitHandleAwaiter {
    /// Wait on `handle` for up to `timeout` (`None` = forever) using the
    /// global pool
    pub fn new(handle: Arc<dyn Waitable>, timeout: Option<Duration>) -> Self {
        Self {
            handle,
            timeout,
            pool: None,
            completion: Arc::new(Completion::new()),
            registration: OnceLock::new(),
        }
    }

    /// Same as [`WaitHandleAwaiter::new`] with an explicit pool
    pub fn with_pool(handle: Arc<dyn Waitable>, timeout: Option<Duration>, pool: WaitPool) -> Self {
        let mut awaiter = Self::new(handle, timeout);
        awaiter.pool = Some(pool);
        awaiter
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn pool(&self) -> AwaitResult<&WaitPool> {
        match &self.pool {
            Some(pool) => Ok(pool),
            None => WaitPool::global(),
        }
    }
}

impl Awaitable for WaitHandleAwaiter {
    type Output = bool;

    fn is_complete(&self) -> bool {
        if self.completion.is_completed() {
            return true;
        }
        self.handle.is_signaled() && {
            self.completion.complete(true);
            true
        }
    }

    fn on_completed(&self, continuation: Continuation) -> AwaitResult<()> {
        let pool = self.pool()?;
        if !self.completion.on_completed(continuation) {
            return Err(AwaitError::Usage(
                "continuation already registered on this wait handle awaiter".into(),
            ));
        }
        if self.completion.value().is_some() {
            return Ok(());
        }

        let token = self.registration.get_or_init(|| Arc::new(Handoff::new())).clone();
        let completion = self.completion.clone();
        let published = token.clone();

        let registration = pool.register_wait(
            self.handle.clone(),
            move |timed_out| {
                // The callback can run before register_wait has returned the
                // token to the registering thread
                if let Some(registration) = published.take() {
                    registration.unregister();
                }
                completion.complete(!timed_out);
            },
            self.timeout,
            true,
        );

        match registration {
            Ok(registration) => {
                debug!(registration = registration.id(), timeout = ?self.timeout, "awaiting wait handle");
                let _ = token.put(registration);
                Ok(())
            }
            Err(e) => {
                self.completion.abandon();
                Err(e)
            }
        }
    }

    fn try_get_result(&self) -> AwaitResult<bool> {
        self.completion
            .value()
            .copied()
            .ok_or_else(|| AwaitError::Usage("wait handle awaiter has not completed".into()))
    }
}

impl Drop for WaitHandleAwaiter {
    fn drop(&mut self) {
        if self.completion.is_completed() {
            return;
        }
        let registration = self.registration.get().and_then(|token| token.try_take());
        if let Some(registration) = registration {
            let removed = registration.unregister();
            debug!(registration = registration.id(), removed, "dropped pending wait handle awaiter");
        }
    }
}

impl IntoFuture for WaitHandleAwaiter {
    type Output = AwaitResult<bool>;
    type IntoFuture = AwaiterFuture<Self>;

    fn into_future(self) -> Self::IntoFuture {
        AwaiterFuture::new(self)
    }
}

/// `await` support for shared waitable objects
///
/// Dropping the returned awaiter (or its future) before it completes
/// unregisters the wait.
pub trait WaitableExt {
    /// Awaiter without a timeout
    fn wait_async(&self) -> WaitHandleAwaiter;

    /// Awaiter resolving to `false` if `timeout` elapses first
    fn wait_async_timeout(&self, timeout: Duration) -> WaitHandleAwaiter;
}

impl<W: Waitable> WaitableExt for Arc<W> {
    fn wait_async(&self) -> WaitHandleAwaiter {
        WaitHandleAwaiter::new(self.clone(), None)
    }

    fn wait_async_timeout(&self, timeout: Duration) -> WaitHandleAwaiter {
        WaitHandleAwaiter::new(self.clone(), Some(timeout))
    }
}
