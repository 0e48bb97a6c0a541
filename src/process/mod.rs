/*!
 * Process Module
 * Child processes with exit notification and the awaiter over their exit
 */

mod awaiter;
mod child;
mod pidfd;

pub use awaiter::{run_process, ProcessAwaiter};
pub use child::{exit_code_of, ChildProcess, ExitEvent, ProcessOptions};
pub use pidfd::PidFd;
