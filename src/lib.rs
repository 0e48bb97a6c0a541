/*!
 * OS Await Library
 *
 * Awaitable completions over operating-system primitives:
 * - Process exit, through a pidfd watched by the wait pool
 * - Waitable kernel objects with an optional timeout
 * - A uniform awaiter contract (is-complete, register, get-result) with a
 *   bridge to Rust futures
 * - Block device size and geometry queries
 */

pub mod awaiter;
pub mod core;
pub mod device;
pub mod dispatch;
pub mod monitoring;
pub mod process;
pub mod wait;

// Re-exports
pub use awaiter::{zero_completed, Awaitable, AwaiterFuture};
pub use crate::core::errors::{AwaitError, AwaitResult};
pub use crate::core::sync::{Completion, CompletionState, Handoff};
pub use crate::core::types::{Continuation, ExitCode, Job, EMPTY_EXIT_CODE};
pub use device::{disk_geometry, disk_size, query_geometry, query_size, DiskGeometry, MediaType};
pub use dispatch::{resume_on, synchronization_context, Dispatcher, SynchronizationContext, SynchronizeInvoke};
pub use monitoring::init_tracing;
pub use process::{run_process, ChildProcess, ExitEvent, ProcessAwaiter, ProcessOptions};
pub use wait::{
    duplicate_handle, Event, NativeWaitHandle, PoolConfig, RegisteredWait, WaitHandleAwaiter,
    WaitPool, Waitable, WaitableExt,
};
