/*!
 * Dispatch Module
 * Thread-affine synchronization contexts and a dedicated dispatcher thread
 */

mod context;
mod dispatcher;

pub use context::{
    current, resume_on, set_current, synchronization_context, ContextRef, SynchronizationContext,
    SynchronizeInvoke,
};
pub use dispatcher::Dispatcher;
