/*!
 * Child Process
 *
 * Spawned OS process with an exit notification. The `Exited` event is raised
 * at most once; subscribers that arrive after it was raised are not called
 * and must check `has_exited` themselves.
 *
 * # Lifecycle
 *
 * - `spawn` opens a pidfd for the child
 * - The first exit subscriber arms a one-shot wait on the pidfd in the pool
 * - On exit the status is reaped, the exit code recorded, subscribers called
 * - `close` releases the native handles; pending subscribers see `Closed`
 */

use super::pidfd::PidFd;
use crate::core::errors::{AwaitError, AwaitResult};
use crate::core::types::ExitCode;
use crate::wait::{duplicate_handle, NativeWaitHandle, RegisteredWait, WaitPool};
use parking_lot::{Mutex, RwLock};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, warn};

use super::awaiter::ProcessAwaiter;

/// Outcome delivered to exit subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitEvent {
    /// The process exited with this code
    Exited(ExitCode),
    /// The process object was closed before the exit was observed
    Closed,
}

type ExitSubscriber = Box<dyn FnOnce(ExitEvent) + Send + 'static>;

/// Spawn options
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Whether exit subscriptions (and awaiting) are allowed
    pub raise_exit_events: bool,
    /// Pool used to watch for exit; the global pool when `None`
    pub pool: Option<WaitPool>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            raise_exit_events: true,
            pool: None,
        }
    }
}

impl ProcessOptions {
    pub fn without_exit_events() -> Self {
        Self {
            raise_exit_events: false,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: WaitPool) -> Self {
        self.pool = Some(pool);
        self
    }
}

#[derive(Default)]
struct ExitState {
    raised: bool,
    subscribers: Vec<ExitSubscriber>,
    armed: Option<RegisteredWait>,
}

/// Spawned child process
pub struct ChildProcess {
    pid: u32,
    child: Mutex<Option<Child>>,
    pidfd: RwLock<Option<Arc<PidFd>>>,
    exit_code: OnceLock<ExitCode>,
    closed: AtomicBool,
    exit: Mutex<ExitState>,
    options: ProcessOptions,
    this: Weak<ChildProcess>,
}

impl ChildProcess {
    /// Spawn `command` with exit events enabled
    pub fn spawn(command: &mut Command) -> AwaitResult<Arc<Self>> {
        Self::spawn_with(command, ProcessOptions::default())
    }

    pub fn spawn_with(command: &mut Command, options: ProcessOptions) -> AwaitResult<Arc<Self>> {
        let child = command.spawn()?;
        info!(
            pid = child.id(),
            program = ?command.get_program(),
            exit_events = options.raise_exit_events,
            "spawned child process"
        );
        Self::from_child(child, options)
    }

    /// Adopt an already spawned, not yet reaped child
    pub fn from_child(child: Child, options: ProcessOptions) -> AwaitResult<Arc<Self>> {
        let pid = child.id();
        let pidfd = match PidFd::open(pid) {
            Ok(fd) => Some(Arc::new(fd)),
            // Without exit events the pidfd is only needed for handle duplication
            Err(e) if !options.raise_exit_events => {
                warn!(pid, error = %e, "pidfd unavailable");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Arc::new_cyclic(|this| Self {
            pid,
            child: Mutex::new(Some(child)),
            pidfd: RwLock::new(pidfd),
            exit_code: OnceLock::new(),
            closed: AtomicBool::new(false),
            exit: Mutex::new(ExitState::default()),
            options,
            this: this.clone(),
        }))
    }

    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn raises_exit_events(&self) -> bool {
        self.options.raise_exit_events
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Non-blocking exit check; reaps the child when it has exited
    pub fn has_exited(&self) -> bool {
        if self.exit_code.get().is_some() {
            return true;
        }
        let mut guard = self.child.lock();
        let Some(child) = guard.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(pid = self.pid, error = %e, "try_wait failed");
                false
            }
        }
    }

    /// Exit code, once the process has exited
    pub fn exit_code(&self) -> Option<ExitCode> {
        if self.has_exited() {
            self.exit_code.get().copied()
        } else {
            None
        }
    }

    /// Subscribe to the `Exited` event
    ///
    /// Not called if the event was already raised.
    pub fn subscribe_exit<F>(&self, subscriber: F) -> AwaitResult<()>
    where
        F: FnOnce(ExitEvent) + Send + 'static,
    {
        if !self.options.raise_exit_events {
            return Err(AwaitError::UnsupportedOperation(
                "process was spawned without exit events".into(),
            ));
        }
        if self.is_closed() {
            return Err(AwaitError::ProcessClosed(self.pid));
        }
        self.enqueue_subscriber(Box::new(subscriber))
    }

    /// Queue a subscriber under the exit lock
    ///
    /// `close` may run between the caller's closed check and this lock. A
    /// close that did not observe an exit leaves nothing for the subscriber
    /// to wait on, so that case is reported as closed.
    fn enqueue_subscriber(&self, subscriber: ExitSubscriber) -> AwaitResult<()> {
        let mut state = self.exit.lock();
        if state.raised {
            return if self.is_closed() && self.exit_code.get().is_none() {
                Err(AwaitError::ProcessClosed(self.pid))
            } else {
                Ok(())
            };
        }
        state.subscribers.push(subscriber);
        if state.armed.is_none() {
            match self.arm() {
                Ok(registration) => state.armed = Some(registration),
                Err(e) => {
                    state.subscribers.pop();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn arm(&self) -> AwaitResult<RegisteredWait> {
        let pidfd = self
            .pidfd
            .read()
            .clone()
            .ok_or(AwaitError::ProcessClosed(self.pid))?;
        let pool = match &self.options.pool {
            Some(pool) => pool,
            None => WaitPool::global()?,
        };

        let this = self.this.clone();
        let registration = pool.register_wait(
            pidfd,
            move |_| {
                if let Some(process) = this.upgrade() {
                    process.raise_exited();
                }
            },
            None,
            true,
        )?;
        debug!(pid = self.pid, registration = registration.id(), "armed exit watch");
        Ok(registration)
    }

    /// Reap the child and notify subscribers
    fn raise_exited(&self) {
        let code = match self.exit_code.get() {
            Some(code) => *code,
            None => match self.reap() {
                Some(code) => code,
                None => return,
            },
        };

        let subscribers = {
            let mut state = self.exit.lock();
            if state.raised {
                return;
            }
            state.raised = true;
            state.armed = None;
            std::mem::take(&mut state.subscribers)
        };

        debug!(pid = self.pid, code, subscribers = subscribers.len(), "process exited");
        for subscriber in subscribers {
            subscriber(ExitEvent::Exited(code));
        }
    }

    /// Blocking reap; only called once the pidfd reported exit
    fn reap(&self) -> Option<ExitCode> {
        let mut guard = self.child.lock();
        let child = guard.as_mut()?;
        match child.wait() {
            Ok(status) => Some(self.record_exit(status)),
            Err(e) => {
                warn!(pid = self.pid, error = %e, "failed to reap child");
                None
            }
        }
    }

    fn record_exit(&self, status: ExitStatus) -> ExitCode {
        *self.exit_code.get_or_init(|| exit_code_of(status))
    }

    /// Send SIGKILL
    pub fn kill(&self) -> AwaitResult<()> {
        let mut guard = self.child.lock();
        let child = guard.as_mut().ok_or(AwaitError::ProcessClosed(self.pid))?;
        child.kill()?;
        Ok(())
    }

    /// Release the native handles
    ///
    /// Pending exit subscribers are called with [`ExitEvent::Closed`].
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut child) = self.child.lock().take() {
            if let Ok(Some(status)) = child.try_wait() {
                self.record_exit(status);
            }
        }
        self.pidfd.write().take();

        let (subscribers, armed) = {
            let mut state = self.exit.lock();
            if state.raised {
                (Vec::new(), None)
            } else {
                state.raised = true;
                (std::mem::take(&mut state.subscribers), state.armed.take())
            }
        };
        if let Some(registration) = armed {
            registration.unregister();
        }

        debug!(pid = self.pid, pending = subscribers.len(), "closed process");
        for subscriber in subscribers {
            subscriber(ExitEvent::Closed);
        }
    }

    /// The process's own waitable handle
    pub fn wait_handle(&self) -> AwaitResult<Arc<PidFd>> {
        self.pidfd
            .read()
            .clone()
            .ok_or(AwaitError::ProcessClosed(self.pid))
    }

    /// Duplicate the process handle; the duplicate belongs to the caller
    pub fn create_wait_handle(&self, inheritable: bool) -> AwaitResult<NativeWaitHandle> {
        let pidfd = self.wait_handle()?;
        duplicate_handle(&*pidfd, inheritable)
    }

    /// Awaiter for the process's exit
    pub fn exited(&self) -> AwaitResult<ProcessAwaiter> {
        let this = self.this.upgrade().ok_or(AwaitError::ProcessClosed(self.pid))?;
        ProcessAwaiter::new(&this)
    }
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exit code of a status: the code, or 128 + signal when killed
pub fn exit_code_of(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
