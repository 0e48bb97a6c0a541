/*!
 * Synchronization Context
 *
 * Capability interface for "run this on the right thread": a per-thread
 * ambient context that accepts posted work, and objects owned by a thread
 * that can marshal a call onto it.
 */

use crate::core::errors::{AwaitError, AwaitResult};
use crate::core::types::{Continuation, Job};
use std::cell::RefCell;
use std::sync::Arc;

/// Target that accepts work to run asynchronously on its own thread(s)
pub trait SynchronizationContext: Send + Sync {
    /// Queue `job`; never runs it inline
    fn post(&self, job: Job);
}

/// Shared context handle
pub type ContextRef = Arc<dyn SynchronizationContext>;

/// Object bound to a thread that can run calls on it
pub trait SynchronizeInvoke: Send + Sync {
    /// Whether the calling thread differs from the owning thread
    fn invoke_required(&self) -> bool;

    /// Run `job` on the owning thread and block until it has run
    fn invoke(&self, job: Job) -> AwaitResult<()>;
}

thread_local! {
    static CURRENT: RefCell<Option<ContextRef>> = const { RefCell::new(None) };
}

/// Context installed on the calling thread
pub fn current() -> Option<ContextRef> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Install `context` on the calling thread, returning the previous one
pub fn set_current(context: Option<ContextRef>) -> Option<ContextRef> {
    CURRENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), context))
}

/// Context of the thread that owns `owner`
///
/// Reads the thread-local directly when already on the owning thread,
/// otherwise reads it through `owner.invoke`.
pub fn synchronization_context(owner: &dyn SynchronizeInvoke) -> AwaitResult<Option<ContextRef>> {
    if !owner.invoke_required() {
        return Ok(current());
    }

    let (tx, rx) = flume::bounded(1);
    owner.invoke(Box::new(move || {
        let _ = tx.send(current());
    }))?;
    rx.recv()
        .map_err(|_| AwaitError::Usage("owner dropped the context query".into()))
}

/// Wrap `continuation` so that it is posted to `context` when invoked
pub fn resume_on(context: ContextRef, continuation: Continuation) -> Continuation {
    Box::new(move || context.post(continuation))
}
