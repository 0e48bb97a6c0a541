/*!
 * Dispatcher
 *
 * Dedicated thread running posted jobs in order. The thread installs the
 * dispatcher as its current synchronization context, so continuations
 * resumed there can post back to it.
 */

use super::context::{set_current, ContextRef, SynchronizationContext, SynchronizeInvoke};
use crate::core::errors::{AwaitError, AwaitResult};
use crate::core::types::{panic_message, Job};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

struct Queue {
    jobs: Mutex<Option<flume::Sender<Job>>>,
}

impl SynchronizationContext for Queue {
    fn post(&self, job: Job) {
        let sender = self.jobs.lock().clone();
        match sender {
            Some(tx) => {
                if tx.send(job).is_err() {
                    warn!("dispatcher thread gone, dropping job");
                }
            }
            None => warn!("dispatcher stopped, dropping job"),
        }
    }
}

/// Single-thread job dispatcher
pub struct Dispatcher {
    queue: Arc<Queue>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start the dispatcher thread
    pub fn new(name: &str) -> AwaitResult<Self> {
        let (tx, rx) = flume::unbounded::<Job>();
        let queue = Arc::new(Queue {
            jobs: Mutex::new(Some(tx)),
        });

        let context: ContextRef = queue.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                set_current(Some(context));
                while let Ok(job) = rx.recv() {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                        warn!(panic = %panic_message(panic.as_ref()), "dispatched job panicked");
                    }
                }
                set_current(None);
            })?;

        debug!(name, "dispatcher started");
        Ok(Self {
            queue,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Context posting to this dispatcher
    pub fn context(&self) -> ContextRef {
        self.queue.clone()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_stopped(&self) -> bool {
        self.queue.jobs.lock().is_none()
    }

    /// Stop accepting jobs and wait for queued ones to finish
    ///
    /// Does not join when called from the dispatcher thread itself.
    pub fn shutdown(&self) {
        self.queue.jobs.lock().take();
        if !self.invoke_required() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }
}

impl SynchronizationContext for Dispatcher {
    fn post(&self, job: Job) {
        self.queue.post(job);
    }
}

impl SynchronizeInvoke for Dispatcher {
    fn invoke_required(&self) -> bool {
        thread::current().id() != self.thread_id
    }

    fn invoke(&self, job: Job) -> AwaitResult<()> {
        if !self.invoke_required() {
            job();
            return Ok(());
        }

        // Dropping the job without running it disconnects the channel
        let (tx, rx) = flume::bounded::<()>(1);
        self.queue.post(Box::new(move || {
            job();
            let _ = tx.send(());
        }));
        rx.recv()
            .map_err(|_| AwaitError::Usage("dispatcher stopped before running the call".into()))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread_id", &self.thread_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::context::{current, synchronization_context};
    use std::time::Duration;

    #[test]
    fn test_post_runs_on_dispatcher_thread() {
        let dispatcher = Dispatcher::new("test-dispatcher").unwrap();
        let expected = dispatcher.thread_id();
        let (tx, rx) = flume::bounded(1);

        dispatcher.post(Box::new(move || {
            let _ = tx.send(thread::current().id());
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(expected));
    }

    #[test]
    fn test_invoke_blocks_until_run() {
        let dispatcher = Dispatcher::new("test-dispatcher").unwrap();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();

        assert!(dispatcher.invoke_required());
        dispatcher
            .invoke(Box::new(move || *s.lock() = Some(thread::current().id())))
            .unwrap();
        assert_eq!(*seen.lock(), Some(dispatcher.thread_id()));
    }

    #[test]
    fn test_context_query_from_foreign_thread() {
        let dispatcher = Dispatcher::new("test-dispatcher").unwrap();
        assert!(current().is_none());

        let context = synchronization_context(&dispatcher).unwrap().unwrap();
        assert!(Arc::ptr_eq(&context, &dispatcher.context()));
    }

    #[test]
    fn test_invoke_after_shutdown_fails() {
        let dispatcher = Dispatcher::new("test-dispatcher").unwrap();
        dispatcher.shutdown();
        assert!(dispatcher.is_stopped());

        let result = dispatcher.invoke(Box::new(|| {}));
        assert!(matches!(result, Err(AwaitError::Usage(_))));
    }

    #[test]
    fn test_panicking_job_keeps_dispatcher() {
        let dispatcher = Dispatcher::new("test-dispatcher").unwrap();
        dispatcher.post(Box::new(|| panic!("job failed")));
        dispatcher.invoke(Box::new(|| {})).unwrap();
    }
}
