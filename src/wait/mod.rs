/*!
 * Wait Module
 * Waitable kernel objects, the pooled wait service, and the awaiter over them
 */

mod awaiter;
mod event;
mod handle;
pub mod pool;

pub use awaiter::{WaitHandleAwaiter, WaitableExt};
pub use event::Event;
pub use handle::{duplicate_handle, poll_readable, NativeWaitHandle, Waitable};
pub use pool::{PoolConfig, RegisteredWait, WaitCallback, WaitPool};
