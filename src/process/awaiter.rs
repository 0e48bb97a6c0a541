/*!
 * Process Exit Awaiter
 *
 * Suspends until a child process exits and yields its exit code.
 *
 * # Races
 *
 * The exit may happen between `is_complete` and `on_completed`, and the
 * `Exited` event is not replayed to late subscribers. `on_completed`
 * therefore subscribes first and re-checks `has_exited` afterwards. Both
 * paths complete the same one-shot completion, so the continuation runs
 * exactly once whichever path wins.
 */

use super::child::{ChildProcess, ExitEvent};
use crate::awaiter::{Awaitable, AwaiterFuture};
use crate::core::errors::{AwaitError, AwaitResult};
use crate::core::sync::Completion;
use crate::core::types::{Continuation, ExitCode, EMPTY_EXIT_CODE};
use std::ffi::OsStr;
use std::future::IntoFuture;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Awaiter over a process's exit
pub struct ProcessAwaiter {
    process: Option<Arc<ChildProcess>>,
    pid: u32,
    completion: Arc<Completion<ExitEvent>>,
}

impl ProcessAwaiter {
    /// Awaiter for `process`
    ///
    /// A closed process yields an awaiter that is already complete with
    /// exit code 0. A process spawned without exit events is rejected.
    pub fn new(process: &Arc<ChildProcess>) -> AwaitResult<Self> {
        let completion = Arc::new(Completion::new());

        if process.is_closed() {
            completion.complete(ExitEvent::Exited(EMPTY_EXIT_CODE));
            return Ok(Self {
                process: None,
                pid: process.id(),
                completion,
            });
        }

        if !process.raises_exit_events() {
            return Err(AwaitError::UnsupportedOperation(format!(
                "process {} does not raise exit events",
                process.id()
            )));
        }

        Ok(Self {
            process: Some(process.clone()),
            pid: process.id(),
            completion,
        })
    }

    /// Whether this awaiter was created over a closed process
    pub fn is_empty(&self) -> bool {
        self.process.is_none()
    }

    fn complete_if_exited(&self, process: &ChildProcess) -> bool {
        match process.exit_code() {
            Some(code) => {
                self.completion.complete(ExitEvent::Exited(code));
                true
            }
            None => false,
        }
    }
}

impl Awaitable for ProcessAwaiter {
    type Output = ExitCode;

    fn is_complete(&self) -> bool {
        if self.completion.is_completed() {
            return true;
        }
        match &self.process {
            Some(process) => self.complete_if_exited(process),
            None => true,
        }
    }

    fn on_completed(&self, continuation: Continuation) -> AwaitResult<()> {
        if !self.completion.on_completed(continuation) {
            return Err(AwaitError::Usage(
                "continuation already registered on this process awaiter".into(),
            ));
        }
        let Some(process) = &self.process else {
            return Ok(());
        };
        if self.completion.value().is_some() {
            return Ok(());
        }

        let completion = self.completion.clone();
        match process.subscribe_exit(move |event| {
            completion.complete(event);
        }) {
            Ok(()) => {}
            Err(AwaitError::ProcessClosed(_)) => {
                self.completion.complete(ExitEvent::Closed);
                return Ok(());
            }
            Err(e) => {
                self.completion.abandon();
                return Err(e);
            }
        }
        debug!(pid = self.pid, "awaiting process exit");

        self.complete_if_exited(process);
        Ok(())
    }

    fn try_get_result(&self) -> AwaitResult<ExitCode> {
        match self.completion.value() {
            Some(ExitEvent::Exited(code)) => Ok(*code),
            Some(ExitEvent::Closed) => Err(AwaitError::ProcessClosed(self.pid)),
            None => Err(AwaitError::Usage(format!(
                "process {} has not exited yet",
                self.pid
            ))),
        }
    }
}

impl IntoFuture for ProcessAwaiter {
    type Output = AwaitResult<ExitCode>;
    type IntoFuture = AwaiterFuture<Self>;

    fn into_future(self) -> Self::IntoFuture {
        AwaiterFuture::new(self)
    }
}

/// Spawn `program`, await its exit and return the exit code
pub async fn run_process<I, S>(program: impl AsRef<OsStr>, args: I) -> AwaitResult<ExitCode>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let process = ChildProcess::spawn(Command::new(program).args(args))?;
    let result = match process.exited() {
        Ok(awaiter) => awaiter.await,
        Err(e) => Err(e),
    };
    process.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOptions;
    use crate::wait::{PoolConfig, WaitPool};
    use std::time::Duration;

    fn spawn(pool: &WaitPool, script: &str) -> Arc<ChildProcess> {
        ChildProcess::spawn_with(
            Command::new("sh").args(["-c", script]),
            ProcessOptions::default().with_pool(pool.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_closed_process_gives_empty_awaiter() {
        let pool = WaitPool::new(PoolConfig::minimal()).unwrap();
        let process = spawn(&pool, "exit 9");
        process.close();

        let awaiter = ProcessAwaiter::new(&process).unwrap();
        assert!(awaiter.is_empty());
        assert!(awaiter.is_complete());
        assert_eq!(awaiter.get_result(), EMPTY_EXIT_CODE);
        pool.shutdown();
    }

    #[test]
    fn test_exit_already_happened() {
        let pool = WaitPool::new(PoolConfig::minimal()).unwrap();
        let process = spawn(&pool, "exit 3");
        while !process.has_exited() {
            std::thread::sleep(Duration::from_millis(5));
        }

        let awaiter = process.exited().unwrap();
        assert!(awaiter.is_complete());
        assert_eq!(awaiter.get_result(), 3);
        pool.shutdown();
    }

    #[test]
    fn test_continuation_after_exit() {
        let pool = WaitPool::new(PoolConfig::minimal()).unwrap();
        let process = spawn(&pool, "sleep 0.05; exit 5");
        let awaiter = process.exited().unwrap();
        let (tx, rx) = flume::bounded(1);

        assert!(!awaiter.is_complete());
        awaiter
            .on_completed(Box::new(move || {
                let _ = tx.send(());
            }))
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(awaiter.try_get_result(), Ok(5));
        pool.shutdown();
    }

    #[test]
    fn test_get_result_before_exit_is_usage_error() {
        let pool = WaitPool::new(PoolConfig::minimal()).unwrap();
        let process = spawn(&pool, "sleep 5");
        let awaiter = process.exited().unwrap();

        assert!(matches!(awaiter.try_get_result(), Err(AwaitError::Usage(_))));
        process.kill().unwrap();
        process.close();
        pool.shutdown();
    }
}
